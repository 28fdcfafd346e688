//! Fan-out reader.
//!
//! Duplicates one readable byte-stream into N independently readable,
//! independently cancellable sinks, without letting a slow consumer on one
//! sink pace the others (in particular: the agent-visible sink must never be
//! paced by the inspector sink, and vice versa).
//!
//! Grounded in `examples/original_source/ctxio/ctxio.go`'s `ReaderFanOut`:
//! a single pump task reads from the source and writes each chunk to every
//! sink; a cancellation token poisons every sink with a sentinel error so a
//! reader blocked in a read returns promptly even if the pump itself is
//! stuck. Rust's ownership rules make the Go version's shared `io.Pipe`
//! writers awkward to replicate directly, so sinks here are backed by
//! `tokio::io::duplex`, each paired with a dedicated writer half retained by
//! the pump.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default per-sink buffer. Chunks larger than this are written in pieces;
/// a sink that reads slower than the pump produces will simply apply
/// backpressure to the pump, which is fine — only the *other* sinks must
/// stay unaffected, and they do, since each sink is an independent duplex.
const SINK_BUFFER: usize = 64 * 1024;

/// A single fanned-out, independently readable, independently cancellable sink.
pub struct FanoutSink {
    reader: DuplexStream,
}

impl FanoutSink {
    pub fn into_reader(self) -> DuplexStream {
        self.reader
    }
}

impl AsyncRead for FanoutSink {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::pin::Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

/// Handle to a running fan-out. Dropping it or calling [`close`] cancels
/// the pump and poisons every sink.
pub struct FanOut {
    cancel: watch::Sender<bool>,
    pump: JoinHandle<io::Result<()>>,
}

impl FanOut {
    /// Start fanning `source` out into `n` sinks. The pump task starts
    /// immediately; sinks may be read from concurrently and independently.
    pub fn new<R>(source: R, n: usize) -> (Self, Vec<FanoutSink>)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut writers = Vec::with_capacity(n);
        let mut sinks = Vec::with_capacity(n);
        for _ in 0..n {
            let (w, r) = tokio::io::duplex(SINK_BUFFER);
            writers.push(w);
            sinks.push(FanoutSink { reader: r });
        }

        let pump = tokio::spawn(pump_loop(source, writers, cancel_rx));

        (
            FanOut {
                cancel: cancel_tx,
                pump,
            },
            sinks,
        )
    }

    /// Cancel the pump and close all sinks, returning the pump's terminating
    /// error (benign EOF maps to `Ok(())`).
    pub async fn close(self) -> io::Result<()> {
        let _ = self.cancel.send(true);
        match self.pump.await {
            Ok(result) => result,
            Err(join_err) => Err(io::Error::other(join_err)),
        }
    }
}

async fn pump_loop<R>(
    mut source: R,
    mut writers: Vec<DuplexStream>,
    mut cancel: watch::Receiver<bool>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; SINK_BUFFER];
    loop {
        // If the `FanOut` handle (and its `cancel` sender) is dropped
        // without ever calling `close`, `changed()` resolves immediately
        // with an error — that must not be mistaken for a cancellation, or
        // a fan-out whose handle merely went out of scope would poison its
        // sinks mid-stream. Once the sender is gone no cancellation can
        // ever arrive, so this branch is parked forever and the pump runs
        // to the source's natural EOF instead.
        let wait_for_cancel = async {
            match cancel.changed().await {
                Ok(()) => {}
                Err(_) => std::future::pending().await,
            }
        };

        let read = tokio::select! {
            biased;
            _ = wait_for_cancel => {
                debug!("fan-out pump cancelled");
                poison_all(&mut writers).await;
                return Ok(());
            }
            read = source.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                debug!("fan-out source reached EOF");
                poison_all(&mut writers).await;
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "fan-out source read error");
                poison_all(&mut writers).await;
                return Err(e);
            }
        };

        let chunk = Bytes::copy_from_slice(&buf[..n]);
        for w in writers.iter_mut() {
            if let Err(e) = w.write_all(&chunk).await {
                // A sink being gone does not stop the pump from serving the
                // others; it only stops serving that one.
                debug!(error = %e, "fan-out sink closed early");
            }
        }
    }
}

async fn poison_all(writers: &mut [DuplexStream]) {
    for w in writers.iter_mut() {
        let _ = w.shutdown().await;
    }
}
