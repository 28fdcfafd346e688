//! Manager control link.
//!
//! A single long-lived TCP connection: the proxy binds and listens, the
//! Manager connects once, and every subsequent frame in either direction
//! flows over that one socket. Framing is length-delimited only in the
//! sense that each write is one complete JSON object; decoding tolerates
//! arbitrary whitespace between objects. Grounded in
//! `examples/original_source/manager/proxy.go` for the accept-retry
//! shape (bounded retries with doubling backoff) and its `json.Encoder`
//! write-one-object-per-call pattern, adapted here to the proxy's side of
//! the link (this proxy listens; the Go file's listener plays the Manager's
//! role, so directions are swapped per the link's contract).

use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const ACCEPT_MAX_RETRIES: u32 = 5;
const ACCEPT_BASE_BACKOFF: Duration = Duration::from_millis(500);

/// A frame sent to the Manager. Field casing (`Action`/`Data`) matches the
/// wire schema, not Rust convention.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "Action", content = "Data")]
pub enum ControlFrame {
    #[serde(rename = "commit")]
    Commit(String),
    #[serde(rename = "load")]
    Load(i64),
}

/// Handle for submitting frames to the control link's writer task.
#[derive(Clone)]
pub struct ControlLink {
    tx: mpsc::Sender<ControlFrame>,
}

impl ControlLink {
    /// Bind `addr`, accept the Manager's single connection (retrying the
    /// accept with doubling backoff), and spawn the writer task. `cancel`
    /// is triggered if a write ever fails — an EOF on this link is benign
    /// and should let the agent exit naturally rather than be treated as a
    /// proxy bug.
    pub async fn bind_and_accept(addr: &str, cancel: CancellationToken) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "control link listening for the Manager");

        let mut backoff = ACCEPT_BASE_BACKOFF;
        let mut last_err = None;
        let mut stream: Option<TcpStream> = None;
        for attempt in 1..=ACCEPT_MAX_RETRIES {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    info!(%peer, "Manager connected to control link");
                    stream = Some(socket);
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "control link accept failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
        let stream = match stream {
            Some(s) => s,
            None => return Err(last_err.unwrap_or_else(|| std::io::Error::other("control link accept exhausted retries"))),
        };

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(writer_task(stream, rx, cancel));
        Ok(Self { tx })
    }

    pub async fn commit(&self, comment: impl Into<String>) {
        let _ = self.tx.send(ControlFrame::Commit(comment.into())).await;
    }

    pub async fn load(&self, history_index: i64) {
        let _ = self.tx.send(ControlFrame::Load(history_index)).await;
    }
}

async fn writer_task(mut stream: TcpStream, mut rx: mpsc::Receiver<ControlFrame>, cancel: CancellationToken) {
    while let Some(frame) = rx.recv().await {
        let mut json = match serde_json::to_vec(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode control frame, aborting");
                cancel.cancel();
                return;
            }
        };
        json.push(b'\n');

        if let Err(e) = stream.write_all(&json).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof || e.kind() == std::io::ErrorKind::BrokenPipe {
                info!("control link closed by Manager, shutting down");
            } else {
                warn!(error = %e, "control link write error, shutting down");
            }
            cancel.cancel();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn commit_frame_matches_wire_schema() {
        let port = portpicker::pick_unused_port().unwrap();
        let addr = format!("127.0.0.1:{port}");
        let cancel = CancellationToken::new();

        let accept = tokio::spawn({
            let addr = addr.clone();
            let cancel = cancel.clone();
            async move { ControlLink::bind_and_accept(&addr, cancel).await }
        });
        // Give the listener a moment to bind before the client dials.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut client = TcpStream::connect(&addr).await.unwrap();

        let link = accept.await.unwrap().unwrap();
        link.commit("toolu_1").await;

        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert_eq!(text.trim(), r#"{"Action":"commit","Data":"toolu_1"}"#);
    }

    #[tokio::test]
    async fn load_frame_matches_wire_schema() {
        let port = portpicker::pick_unused_port().unwrap();
        let addr = format!("127.0.0.1:{port}");
        let cancel = CancellationToken::new();

        let accept = tokio::spawn({
            let addr = addr.clone();
            let cancel = cancel.clone();
            async move { ControlLink::bind_and_accept(&addr, cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut client = TcpStream::connect(&addr).await.unwrap();

        let link = accept.await.unwrap().unwrap();
        link.load(0).await;

        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert_eq!(text.trim(), r#"{"Action":"load","Data":0}"#);
    }
}
