//! Command-line configuration.

use std::path::PathBuf;

use clap::Parser;

/// Transparent intercepting reverse proxy for a coding agent's Model API traffic.
#[derive(Debug, Parser)]
#[command(name = "cosmos-proxy", version, about)]
pub struct Cli {
    /// Address the agent-facing HTTP listener binds to.
    #[arg(long, env = "COSMOS_LISTEN_ADDR", default_value = "localhost:8080")]
    pub listen_addr: String,

    /// Upstream Model API host, reached over HTTPS.
    #[arg(long, env = "COSMOS_UPSTREAM_HOST", default_value = "api.anthropic.com")]
    pub upstream_host: String,

    /// Address the Manager control link listens on.
    #[arg(long, env = "COSMOS_MANAGER_ADDR", default_value = "0.0.0.0:8042")]
    pub manager_addr: String,

    /// Log file the proxy writes structured logs to (never stdout/stderr:
    /// those belong to the agent's TTY).
    #[arg(long, env = "COSMOS_LOG_FILE", default_value = "/tmp/cosmos-proxy.log")]
    pub log_file: PathBuf,

    /// Path to the agent's JSONL session log, consumed by the tool-result
    /// correlator. Optional: if absent, the correlator is not started and
    /// queued tool-use IDs are never confirmed completed.
    #[arg(long, env = "COSMOS_AGENT_LOG")]
    pub agent_log: Option<PathBuf>,

    /// Command used to launch the agent subprocess, e.g. `claude`.
    #[arg(long, env = "COSMOS_AGENT_CMD", default_value = "claude")]
    pub agent_cmd: String,

    /// Arguments forwarded verbatim to the agent subprocess.
    #[arg(trailing_var_arg = true)]
    pub agent_args: Vec<String>,
}
