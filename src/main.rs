//! Entrypoint: parse configuration, start the proxy listener and the
//! Manager control link, launch the agent subprocess, and propagate its
//! exit code. Grounded in `examples/original_source/entrypoint/entrypoint.go`'s
//! `main` for the startup order (spawn proxy, wait for it, exec agent,
//! forward signals, propagate exit code) and in the teacher's own
//! `tracing`/`clap` ambient stack.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cosmos_proxy::cli::Cli;
use cosmos_proxy::correlator::{self, ToolCompletionEvent};
use cosmos_proxy::proxy::{self, AppState};
use cosmos_proxy::{logging, supervisor};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_guard = match logging::init(&cli.log_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e:#}");
            std::process::exit(1);
        }
    };

    let outcome = run(cli).await;
    // `std::process::exit` skips destructors, so the non-blocking log
    // writer's flush-on-drop must run explicitly before it, or trailing
    // log lines from this final stretch are lost.
    let code = match outcome {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "fatal error");
            1
        }
    };
    drop(log_guard);
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let shutdown = CancellationToken::new();

    let http_client = reqwest::Client::builder()
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build upstream HTTP client: {e}"))?;

    let state = Arc::new(AppState::new(http_client, cli.upstream_host.clone(), shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(&cli.listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind agent-facing listener on {}: {e}", cli.listen_addr))?;
    info!(addr = %cli.listen_addr, "agent-facing listener bound");

    let router = proxy::router(state.clone());
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    {
        let state = state.clone();
        let manager_addr = cli.manager_addr.clone();
        let link_shutdown = shutdown.clone();
        tokio::spawn(async move {
            match cosmos_proxy::control_link::ControlLink::bind_and_accept(&manager_addr, link_shutdown).await {
                Ok(link) => state.set_control_link(link).await,
                Err(e) => warn!(error = %e, "Manager control link never connected"),
            }
        });
    }

    supervisor::wait_until_ready(&cli.listen_addr).await?;

    if let Some(agent_log) = cli.agent_log.clone() {
        let pending = state.pending_tools.clone();
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel::<ToolCompletionEvent>(32);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    info!(tool_use_id = %event.tool_use_id, timestamp = %event.timestamp, line_no = event.line_no, "tool completion observed");
                }
            });
            if let Err(e) = correlator::run(&agent_log, &pending, &tx).await {
                warn!(error = %e, "tool-result correlator exited with errors");
            }
        });
    }

    let child = supervisor::spawn_agent(&cli.agent_cmd, &cli.agent_args, &cli.listen_addr)?;
    let status = supervisor::run_to_completion(child).await?;
    let code = supervisor::exit_code(status);

    shutdown.cancel();
    let _ = server.await;

    info!(code, "agent exited, proxy shutting down");
    Ok(code)
}
