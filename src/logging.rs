//! Tracing init. The agent's own stdio is passed through by the supervisor,
//! so the proxy never writes to stdout/stderr by default — only to a log
//! file, matching the Go prototype's `/tmp/cosmos-proxy.log` convention.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber, writing to `log_file`.
///
/// Returns the `WorkerGuard` for the non-blocking writer; it must be kept
/// alive for the lifetime of the process or buffered log lines are dropped.
pub fn init(log_file: &Path) -> anyhow::Result<WorkerGuard> {
    let dir = log_file.parent().filter(|p| !p.as_os_str().is_empty());
    let file_name = log_file
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("log file path has no file name: {}", log_file.display()))?;

    let file_appender = tracing_appender::rolling::never(dir.unwrap_or_else(|| Path::new(".")), file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .init();

    Ok(guard)
}
