//! hbmon: heartbeat telemetry monitor.
//! One binary: the daemon (board loop + UDS server) and its CLI clients.

use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

mod auth;
mod board_loop;
mod cli;
mod client;
mod config;
mod monitor;
mod server;
mod sink;

use crate::auth::Authorizer;
use crate::board_loop::BoardPublisher;
use crate::config::Config;
use crate::monitor::MonitorState;
use crate::server::RpcContext;
use crate::sink::{AlertSink, BoardSink, FileBoardSink, JsonlAlertSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon => {
            let filter = std::env::var("HBMON_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("hbmon daemon starting");

            let config = Config::load(&args.config)?;
            run_daemon(config, &socket_path).await?;
        }
        cli::Command::Ingest(opts) => {
            let mut content = String::new();
            std::io::stdin().read_to_string(&mut content)?;
            let params = json!({
                "sender_id": opts.sender,
                "channel_id": opts.channel,
                "content": content,
            });
            client::run(&socket_path, "ingest", params, client::format_ingest).await?;
        }
        cli::Command::Check { worker } => {
            let params = json!({ "worker_id": worker });
            client::run(&socket_path, "check", params, |result| {
                client::format_check(&worker, result)
            })
            .await?;
        }
        cli::Command::Inactive { days } => {
            let params = json!({ "days": days });
            client::run(&socket_path, "inactive", params, client::format_inactive).await?;
        }
        cli::Command::Testers => {
            client::run(&socket_path, "testers", json!({}), client::format_testers).await?;
        }
        cli::Command::Totals => {
            client::run(&socket_path, "totals", json!({}), client::format_totals).await?;
        }
        cli::Command::Top { n } => {
            client::run(&socket_path, "top", json!({ "n": n }), client::format_top).await?;
        }
        cli::Command::Chart(opts) => {
            let params = json!({
                "kind": opts.kind,
                "worker_id": opts.worker,
                "window_days": opts.days,
            });
            client::run(&socket_path, "chart", params, |result| {
                client::format_chart(result, opts.json)
            })
            .await?;
        }
        cli::Command::Board => {
            client::run(&socket_path, "board", json!({}), client::format_board).await?;
        }
        cli::Command::Confirm(opts) => {
            let params = json!({
                "user_id": opts.user,
                "confirmer_id": opts.confirmer,
                "roles": opts.roles.roles,
            });
            client::run(&socket_path, "confirm", params, client::format_confirm).await?;
        }
        cli::Command::Retract(opts) => {
            let params = json!({
                "user_id": opts.user,
                "confirmer_id": opts.confirmer,
                "roles": opts.roles.roles,
            });
            client::run(&socket_path, "retract", params, client::format_retract).await?;
        }
        cli::Command::Retire { worker, roles } => {
            let params = json!({ "worker_id": worker, "roles": roles.roles });
            client::run(&socket_path, "retire", params, client::format_retire).await?;
        }
    }

    Ok(())
}

async fn run_daemon(config: Config, socket_path: &str) -> anyhow::Result<()> {
    let (state, _) = MonitorState::open(&config)?;
    let store = state.queries();
    let state = Arc::new(Mutex::new(state));
    let cancel = CancellationToken::new();

    let board_sink: Arc<dyn BoardSink> =
        Arc::new(FileBoardSink::new(config.store.resolve(&config.board.output)));
    let alert_sink: Arc<dyn AlertSink> =
        Arc::new(JsonlAlertSink::new(config.store.resolve(&config.alert.output)));

    // Start UDS server
    let ctx = Arc::new(RpcContext {
        state: Arc::clone(&state),
        alert_sink,
        auth: Authorizer::new(config.auth.moderator_roles.clone()),
        queries: config.queries.clone(),
        store,
    });
    let server_socket = socket_path.to_string();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, ctx, server_cancel).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Start board loop
    let publisher = Arc::new(Mutex::new(BoardPublisher::new(board_sink)));
    let period = Duration::from_secs(config.board.edit_period_secs.max(1));
    let board_handle = tokio::spawn(board_loop::run_board_loop(
        Arc::clone(&state),
        publisher,
        period,
        cancel.clone(),
    ));

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = board_handle => {
            tracing::warn!("board loop exited unexpectedly");
        }
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    cancel.cancel();

    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}
