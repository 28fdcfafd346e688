//! SSE frame reader.
//!
//! Splits a byte-stream into discrete SSE event frames without buffering the
//! whole response, then parses each frame's `id:`/`data:`/`event:`/`retry:`
//! fields. Grounded in `examples/original_source/proxy/sse.go`'s
//! `processEvent`/`trimHeader` (line splitting on CR or LF, multi-line
//! `data:` concatenation with `\n`, optional leading-space trim, trailing
//! newline trim) for field parsing, and in
//! `model_gateway/src/routers/anthropic/sse.rs`'s `consume_and_forward` for
//! the buffer-and-split-on-blank-line framing loop.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use futures_util::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProxyError;

/// A single parsed SSE event. Base64 decoding of `data` is supported by the
/// wire format but never enabled by this proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry: Option<String>,
}

/// Reads raw bytes and yields parsed [`SseEvent`]s, one per blank-line
/// terminated frame. EOF flushes any pending partial frame before ending.
pub struct SseFrameReader<R> {
    inner: R,
    buf: BytesMut,
    read_buf: Box<[u8]>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> SseFrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            read_buf: vec![0u8; 8 * 1024].into_boxed_slice(),
            eof: false,
        }
    }

    /// Pull the next complete frame out of `self.buf`, if one is present.
    /// A frame is a maximal run of non-empty lines terminated by a blank
    /// line; line endings may be LF, CR, or CRLF.
    fn take_frame(&mut self) -> Option<BytesMut> {
        let haystack = &self.buf[..];
        let mut i = 0;
        while i + 1 < haystack.len() {
            let (sep_len, is_blank) = match haystack[i] {
                b'\n' => {
                    if haystack.get(i + 1) == Some(&b'\n') {
                        (2, true)
                    } else {
                        (1, false)
                    }
                }
                b'\r' => {
                    let one = haystack.get(i + 1) == Some(&b'\r');
                    let crlf_crlf = haystack.get(i + 1) == Some(&b'\n')
                        && haystack.get(i + 2) == Some(&b'\r')
                        && haystack.get(i + 3) == Some(&b'\n');
                    if crlf_crlf {
                        (4, true)
                    } else if one {
                        (2, true)
                    } else {
                        (1, false)
                    }
                }
                _ => {
                    i += 1;
                    continue;
                }
            };
            if is_blank {
                let frame = self.buf.split_to(i);
                self.buf.advance(sep_len);
                return Some(frame);
            }
            i += sep_len;
        }
        None
    }

    async fn fill(&mut self) -> std::io::Result<usize> {
        let n = self.inner.read(&mut self.read_buf).await?;
        if n > 0 {
            self.buf.extend_from_slice(&self.read_buf[..n]);
        }
        Ok(n)
    }
}

impl<R: AsyncRead + Unpin> Stream for SseFrameReader<R> {
    type Item = Result<SseEvent, ProxyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(frame) = this.take_frame() {
                if frame.is_empty() {
                    continue;
                }
                return Poll::Ready(Some(parse_sse_frame(&frame)));
            }
            if this.eof {
                if this.buf.is_empty() {
                    return Poll::Ready(None);
                }
                let rest = std::mem::take(&mut this.buf);
                return Poll::Ready(Some(parse_sse_frame(&rest)));
            }

            let fut = this.fill();
            futures_util::pin_mut!(fut);
            match fut.poll(cx) {
                Poll::Ready(Ok(0)) => this.eof = true,
                Poll::Ready(Ok(_)) => continue,
                Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(ProxyError::SseParse(e.to_string())))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

const HEADER_ID: &[u8] = b"id:";
const HEADER_DATA: &[u8] = b"data:";
const HEADER_EVENT: &[u8] = b"event:";
const HEADER_RETRY: &[u8] = b"retry:";

fn trim_header(prefix_len: usize, line: &[u8]) -> &[u8] {
    if line.len() < prefix_len {
        return line;
    }
    let mut rest = &line[prefix_len..];
    if rest.first() == Some(&b' ') {
        rest = &rest[1..];
    }
    rest
}

/// Parse one raw frame (the bytes between two blank lines) into an
/// [`SseEvent`], per the field rules in `processEvent`.
pub fn parse_sse_frame(raw: &[u8]) -> Result<SseEvent, ProxyError> {
    if raw.is_empty() {
        return Err(ProxyError::SseParse("event message was empty".into()));
    }

    let mut event = SseEvent::default();
    let mut data = Vec::new();

    for line in raw.split(|&b| b == b'\n' || b == b'\r').filter(|l| !l.is_empty()) {
        if let Some(rest) = strip_prefix(line, HEADER_ID) {
            event.id = Some(String::from_utf8_lossy(trim_header(0, rest)).into_owned());
        } else if let Some(rest) = strip_prefix(line, HEADER_DATA) {
            data.extend_from_slice(trim_header(0, rest));
            data.push(b'\n');
        } else if line == b"data" {
            data.push(b'\n');
        } else if let Some(rest) = strip_prefix(line, HEADER_EVENT) {
            event.event = Some(String::from_utf8_lossy(trim_header(0, rest)).into_owned());
        } else if let Some(rest) = strip_prefix(line, HEADER_RETRY) {
            event.retry = Some(String::from_utf8_lossy(trim_header(0, rest)).into_owned());
        }
        // Anything else is ignored, per the wire format.
    }

    if data.last() == Some(&b'\n') {
        data.pop();
    }

    event.data = String::from_utf8(data).map_err(|e| ProxyError::SseParse(e.to_string()))?;
    Ok(event)
}

fn strip_prefix<'a>(line: &'a [u8], header: &[u8]) -> Option<&'a [u8]> {
    let body = header.len();
    if line.len() >= body && &line[..body] == header {
        Some(&line[body..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn parses_basic_fields() {
        let raw = b"event: message_start\ndata: {\"type\":\"message_start\"}\nid: 1\n";
        let ev = parse_sse_frame(raw).unwrap();
        assert_eq!(ev.event.as_deref(), Some("message_start"));
        assert_eq!(ev.data, "{\"type\":\"message_start\"}");
        assert_eq!(ev.id.as_deref(), Some("1"));
    }

    #[test]
    fn concatenates_multi_line_data() {
        let raw = b"data: line one\ndata: line two\n";
        let ev = parse_sse_frame(raw).unwrap();
        assert_eq!(ev.data, "line one\nline two");
    }

    #[test]
    fn bare_data_token_is_empty_line() {
        let raw = b"data\ndata: tail\n";
        let ev = parse_sse_frame(raw).unwrap();
        assert_eq!(ev.data, "\ntail");
    }

    #[test]
    fn rejects_empty_message() {
        assert!(parse_sse_frame(b"").is_err());
    }

    #[tokio::test]
    async fn reassembles_frames_split_across_reads() {
        let chunks: Vec<&[u8]> = vec![b"data: hel", b"lo\n\nda", b"ta: world\n\n"];
        let reader = tokio_util::io::StreamReader::new(futures_util::stream::iter(
            chunks.into_iter().map(|c| Ok::<_, std::io::Error>(bytes::Bytes::from_static(c))),
        ));
        let mut frames = SseFrameReader::new(reader);
        let first = frames.next().await.unwrap().unwrap();
        assert_eq!(first.data, "hello");
        let second = frames.next().await.unwrap().unwrap();
        assert_eq!(second.data, "world");
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn flushes_pending_frame_on_eof() {
        let reader = tokio_util::io::StreamReader::new(futures_util::stream::iter(vec![Ok::<_, std::io::Error>(
            bytes::Bytes::from_static(b"event: message_stop\ndata: {}"),
        )]));
        let mut frames = SseFrameReader::new(reader);
        let only = frames.next().await.unwrap().unwrap();
        assert_eq!(only.event.as_deref(), Some("message_stop"));
        assert!(frames.next().await.is_none());
    }
}
