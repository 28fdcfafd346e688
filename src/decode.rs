//! Content decoder.
//!
//! Transparently decodes `gzip`/`br` response bodies and validates the
//! response's media type and charset, so the agent always sees plaintext
//! it can parse without re-implementing decompression itself. Grounded in
//! `examples/original_source/proxy/proxy.go`'s `ModifyResponse` decode
//! switch (`Content-Encoding` dispatch, `mime.ParseMediaType` charset check);
//! the gzip/brotli decoders themselves come from `async-compression`, whose
//! use for exactly this purpose is grounded in
//! `other_examples/manifests/npolshakova-agentgateway/Cargo.toml`.

use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder};
use axum::http::HeaderMap;
use tokio::io::{AsyncRead, BufReader};
use tokio_util::io::StreamReader;

use crate::error::ProxyError;

pub const CONTENT_ENCODING: &str = "content-encoding";
pub const CONTENT_TYPE: &str = "content-type";

/// A decoded response body: a uniform `AsyncRead` regardless of the
/// upstream's original encoding.
pub enum DecodedBody<R> {
    Identity(R),
    Gzip(GzipDecoder<BufReader<R>>),
    Brotli(BrotliDecoder<BufReader<R>>),
}

impl<R: AsyncRead + Unpin> AsyncRead for DecodedBody<R> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            DecodedBody::Identity(r) => std::pin::Pin::new(r).poll_read(cx, buf),
            DecodedBody::Gzip(d) => std::pin::Pin::new(d).poll_read(cx, buf),
            DecodedBody::Brotli(d) => std::pin::Pin::new(d).poll_read(cx, buf),
        }
    }
}

/// Wrap `body` according to the response's `Content-Encoding`, returning the
/// decoded stream. The caller must strip `Content-Encoding` from the
/// outgoing headers afterward — this function only decides how to read,
/// it does not mutate headers.
pub fn wrap_decoder<R: AsyncRead + Unpin>(encoding: Option<&str>, body: R) -> Result<DecodedBody<R>, ProxyError> {
    match encoding.unwrap_or("") {
        "" => Ok(DecodedBody::Identity(body)),
        "gzip" => Ok(DecodedBody::Gzip(GzipDecoder::new(BufReader::new(body)))),
        "br" => Ok(DecodedBody::Brotli(BrotliDecoder::new(BufReader::new(body)))),
        other => Err(ProxyError::UnhandledEncoding(other.to_string())),
    }
}

/// Media type and optional charset extracted from a `Content-Type` header.
pub struct ParsedContentType {
    pub media_type: String,
    pub charset: Option<String>,
}

/// Parse `Content-Type`, rejecting any charset other than `utf-8`. A missing
/// header parses to an empty media type with no charset — the caller treats
/// that as "fall through to raw byte mirroring", matching the Go prototype's
/// `if ct != ""` guard.
pub fn parse_content_type(value: Option<&str>) -> Result<ParsedContentType, ProxyError> {
    let Some(value) = value else {
        return Ok(ParsedContentType {
            media_type: String::new(),
            charset: None,
        });
    };

    let mime: mime::Mime = value
        .parse()
        .map_err(|_| ProxyError::InvalidMediaType(value.to_string()))?;

    let charset = mime.get_param(mime::CHARSET).map(|c| c.as_str().to_string());
    if let Some(cs) = &charset {
        if !cs.eq_ignore_ascii_case("utf-8") {
            return Err(ProxyError::UnhandledCharset(cs.clone()));
        }
    }

    Ok(ParsedContentType {
        media_type: format!("{}/{}", mime.type_(), mime.subtype()),
        charset,
    })
}

/// Remove the `Content-Encoding` header in place, since the proxy has
/// already decompressed the body and the agent must see plaintext.
pub fn strip_content_encoding(headers: &mut HeaderMap) {
    headers.remove(CONTENT_ENCODING);
}

/// Build a `DecodedBody` directly from a `reqwest` byte stream, for callers
/// that haven't already adapted it to `AsyncRead`.
pub fn decode_stream<S, E>(
    encoding: Option<&str>,
    stream: S,
) -> Result<DecodedBody<StreamReader<S, bytes::Bytes>>, ProxyError>
where
    S: futures_util::Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let reader = StreamReader::new(futures_util::TryStreamExt::map_err(stream, |e| {
        std::io::Error::other(e.into())
    }));
    wrap_decoder(encoding, reader)
}
