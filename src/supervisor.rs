//! Agent supervisor.
//!
//! Launches the agent subprocess with its stdio inherited, forwards the
//! signals a terminal session expects a foreground process to receive, and
//! propagates its exit code. Grounded in
//! `examples/original_source/entrypoint/entrypoint.go` for the spawn/
//! readiness-wait/signal-and-wait/exit-code shape, and in
//! `examples/swedishembedded-sven/src/main.rs`'s
//! `tokio::signal::unix::{signal, SignalKind}` pattern for forwarding
//! multiple distinct signals via `tokio::select!`.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{info, warn};

const READINESS_MAX_ATTEMPTS: u32 = 30;
const READINESS_BACKOFF: Duration = Duration::from_millis(500);
const READINESS_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Block until a TCP connection to `listen_addr` succeeds, retrying with a
/// fixed backoff. Mirrors the entrypoint's dial loop: fixed interval, not
/// exponential, because the quantity being waited on (the listener socket
/// opening) resolves in one step, not over a growing series of attempts.
pub async fn wait_until_ready(listen_addr: &str) -> anyhow::Result<()> {
    for attempt in 1..=READINESS_MAX_ATTEMPTS {
        match tokio::time::timeout(READINESS_DIAL_TIMEOUT, TcpStream::connect(listen_addr)).await {
            Ok(Ok(_stream)) => return Ok(()),
            _ => {
                if attempt == READINESS_MAX_ATTEMPTS {
                    anyhow::bail!("proxy failed to become ready after {} attempts", READINESS_MAX_ATTEMPTS);
                }
                tokio::time::sleep(READINESS_BACKOFF).await;
            }
        }
    }
    unreachable!()
}

/// Spawn the agent subprocess, with stdio inherited and
/// `ANTHROPIC_BASE_URL` pointing at the proxy's own listener.
pub fn spawn_agent(cmd: &str, args: &[String], proxy_listen_addr: &str) -> std::io::Result<Child> {
    Command::new(cmd)
        .args(args)
        .env("ANTHROPIC_BASE_URL", format!("http://{proxy_listen_addr}"))
        .stdin(std::process::Stdio::inherit())
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
}

/// Run the agent to completion, forwarding SIGINT/SIGTERM/SIGHUP/SIGQUIT/
/// SIGUSR1/SIGUSR2 from this process to it as they arrive, and return its
/// exit status.
#[cfg(unix)]
pub async fn run_to_completion(mut child: Child) -> anyhow::Result<ExitStatus> {
    use tokio::signal::unix::{signal, SignalKind};

    let pid = child
        .id()
        .ok_or_else(|| anyhow::anyhow!("agent process has no pid"))?;

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigusr2 = signal(SignalKind::user_defined2())?;

    loop {
        tokio::select! {
            status = child.wait() => return Ok(status?),
            _ = sigint.recv() => forward(pid, libc::SIGINT, "SIGINT"),
            _ = sigterm.recv() => forward(pid, libc::SIGTERM, "SIGTERM"),
            _ = sighup.recv() => forward(pid, libc::SIGHUP, "SIGHUP"),
            _ = sigquit.recv() => forward(pid, libc::SIGQUIT, "SIGQUIT"),
            _ = sigusr1.recv() => forward(pid, libc::SIGUSR1, "SIGUSR1"),
            _ = sigusr2.recv() => forward(pid, libc::SIGUSR2, "SIGUSR2"),
        }
    }
}

/// Forward `sig` to `pid` via a raw `kill(2)` call — `tokio::process::Child`
/// has no signal-sending API of its own.
#[cfg(unix)]
fn forward(pid: u32, sig: libc::c_int, name: &str) {
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc != 0 {
        warn!(signal = name, error = %std::io::Error::last_os_error(), "failed to forward signal to agent");
    } else {
        info!(signal = name, "forwarded signal to agent");
    }
}

#[cfg(not(unix))]
pub async fn run_to_completion(mut child: Child) -> anyhow::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => Ok(status?),
        _ = tokio::signal::ctrl_c() => {
            child.kill().await?;
            Ok(child.wait().await?)
        }
    }
}

/// Translate an `ExitStatus` into the code this process should itself exit
/// with, matching a signal-terminated child's conventional `128 + signum`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
