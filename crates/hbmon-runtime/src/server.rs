//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use hbmon_core::{ChartError, ChartKind, WorkerId};
use hbmon_store::StoreError;

use crate::auth::{AuthorizationDenied, Authorizer};
use crate::config::QueryConfig;
use crate::monitor::{Envelope, IngestOutcome, MonitorState, StoreQueries};
use crate::sink::AlertSink;

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Unauthorized(#[from] AuthorizationDenied),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("query task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::Unauthorized(_) => -32001,
            RpcError::Store(_) | RpcError::Encode(_) | RpcError::Join(_) => -32000,
        }
    }
}

// ─── Params ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IngestParams {
    sender_id: String,
    channel_id: String,
    content: String,
    /// Defaults to the time the daemon handles the request.
    #[serde(default)]
    received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct WorkerParams {
    worker_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct InactiveParams {
    #[serde(default)]
    days: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TopParams {
    #[serde(default)]
    n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ChartParams {
    kind: String,
    #[serde(default)]
    worker_id: Option<String>,
    #[serde(default)]
    window_days: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TestEventParams {
    user_id: String,
    confirmer_id: String,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RetireParams {
    worker_id: String,
    #[serde(default)]
    roles: Vec<String>,
}

fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, RpcError> {
    let params = if params.is_null() {
        serde_json::json!({})
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn worker_id(input: &str) -> Result<WorkerId, RpcError> {
    WorkerId::normalize(input)
        .ok_or_else(|| RpcError::InvalidParams(format!("not a worker id: {input:?}")))
}

fn user_id(input: &str) -> Result<WorkerId, RpcError> {
    WorkerId::normalize_digits(input)
        .ok_or_else(|| RpcError::InvalidParams(format!("not a user id: {input:?}")))
}

// ─── Dispatch ────────────────────────────────────────────────────

/// Everything a request handler needs.
pub struct RpcContext {
    pub state: Arc<Mutex<MonitorState>>,
    pub alert_sink: Arc<dyn AlertSink>,
    pub auth: Authorizer,
    pub queries: QueryConfig,
    pub store: StoreQueries,
}

/// Run a bulk query on the blocking pool, outside the monitor lock.
async fn scan<T, F>(ctx: &RpcContext, query: F) -> Result<T, RpcError>
where
    T: Send + 'static,
    F: FnOnce(&StoreQueries) -> Result<T, StoreError> + Send + 'static,
{
    let store = ctx.store.clone();
    Ok(tokio::task::spawn_blocking(move || query(&store)).await??)
}

/// Handle one method call. The monitor lock is never held across a sink call
/// or a full store scan.
pub async fn dispatch(
    ctx: &RpcContext,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, RpcError> {
    let now = Utc::now();
    match method {
        "ingest" => {
            let p: IngestParams = parse_params(params)?;
            let envelope = Envelope {
                sender_id: p.sender_id,
                channel_id: p.channel_id,
                content: p.content,
                received_at: p.received_at.unwrap_or(now),
            };
            let outcome = ctx.state.lock().await.ingest(&envelope);
            if let IngestOutcome::Recorded {
                alert: Some(alert), ..
            } = &outcome
                && let Err(e) = ctx.alert_sink.send(alert).await
            {
                tracing::warn!(worker = %alert.worker_id, "alert delivery failed: {e}");
            }
            Ok(serde_json::to_value(outcome)?)
        }
        "check" => {
            let p: WorkerParams = parse_params(params)?;
            let id = worker_id(&p.worker_id)?;
            let status = ctx.state.lock().await.check(&id)?;
            Ok(serde_json::to_value(status)?)
        }
        "inactive" => {
            let p: InactiveParams = parse_params(params)?;
            let days = p.days.unwrap_or(ctx.queries.inactive_days);
            let workers = scan(ctx, move |store| store.inactive(days, now)).await?;
            Ok(serde_json::json!({ "days": days, "workers": workers }))
        }
        "testers" => {
            let groups = scan(ctx, StoreQueries::testers).await?;
            Ok(serde_json::to_value(groups)?)
        }
        "totals" => {
            let totals = scan(ctx, StoreQueries::totals).await?;
            Ok(serde_json::to_value(totals)?)
        }
        "top" => {
            let p: TopParams = parse_params(params)?;
            let n = p.n.unwrap_or(ctx.queries.top_n);
            let ranked = scan(ctx, move |store| store.top(n)).await?;
            Ok(serde_json::to_value(ranked)?)
        }
        "chart" => {
            let p: ChartParams = parse_params(params)?;
            let kind =
                ChartKind::from_str(&p.kind).map_err(|e| RpcError::InvalidParams(e.to_string()))?;
            let subject = p.worker_id.as_deref().map(worker_id).transpose()?;
            let window = p.window_days.unwrap_or(ctx.queries.chart_window_days);
            let chart = scan(ctx, move |store| {
                store.chart(kind, subject.as_ref().map(WorkerId::as_str), window, now)
            })
            .await?;
            match chart {
                Ok(data) => Ok(serde_json::to_value(data)?),
                Err(ChartError::NoData) => Ok(serde_json::Value::Null),
                Err(e) => Err(RpcError::InvalidParams(e.to_string())),
            }
        }
        "board" => {
            let inputs = ctx.state.lock().await.board_inputs();
            let payload = inputs.build(now).render(inputs.policy.max_payload_chars);
            Ok(serde_json::json!({ "payload": payload }))
        }
        "confirm" => {
            let p: TestEventParams = parse_params(params)?;
            ctx.auth.authorize("confirm", &p.roles)?;
            let id = user_id(&p.user_id)?;
            let event = ctx.state.lock().await.confirm(&id, &p.confirmer_id, now)?;
            tracing::info!(user = %id, confirmer = %p.confirmer_id, seq = event.sequence_number, "test confirmed");
            Ok(serde_json::json!({ "user_id": id, "event": event }))
        }
        "retract" => {
            let p: TestEventParams = parse_params(params)?;
            ctx.auth.authorize("retract", &p.roles)?;
            let id = user_id(&p.user_id)?;
            let outcome = ctx.state.lock().await.retract(&id, &p.confirmer_id)?;
            Ok(serde_json::json!({ "user_id": id, "result": outcome }))
        }
        "retire" => {
            let p: RetireParams = parse_params(params)?;
            ctx.auth.authorize("retire", &p.roles)?;
            let id = user_id(&p.worker_id)?;
            let report = ctx.state.lock().await.retire(&id);
            Ok(serde_json::to_value(report)?)
        }
        other => Err(RpcError::MethodNotFound(other.to_string())),
    }
}

// ─── Server ──────────────────────────────────────────────────────

/// Run the UDS JSON-RPC server until `cancel` fires.
pub async fn run_server(
    socket_path: &str,
    ctx: Arc<RpcContext>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        tracing::debug!("connection error: {e}");
                    }
                });
            }
            _ = cancel.cancelled() => {
                tracing::info!("UDS server: cancellation requested, shutting down");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    ctx: Arc<RpcContext>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<serde_json::Value>(line.trim()) {
        Ok(mut request) => {
            let method = request["method"].as_str().unwrap_or("").to_string();
            let id = take_field(&mut request, "id");
            let params = take_field(&mut request, "params");
            tracing::debug!(%method, "request received");
            match dispatch(&ctx, &method, params).await {
                Ok(result) => serde_json::json!({
                    "jsonrpc": "2.0",
                    "result": result,
                    "id": id,
                }),
                Err(e) => {
                    tracing::debug!(%method, code = e.code(), "request failed: {e}");
                    error_response(e.code(), &e.to_string(), id)
                }
            }
        }
        Err(e) => error_response(-32700, &format!("parse error: {e}"), serde_json::Value::Null),
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;
    Ok(())
}

fn take_field(request: &mut serde_json::Value, key: &str) -> serde_json::Value {
    request
        .get_mut(key)
        .map(serde_json::Value::take)
        .unwrap_or_default()
}

fn error_response(code: i32, message: &str, id: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message},
        "id": id,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::sink::fakes::FakeAlertSink;

    fn context(dir: &tempfile::TempDir) -> (Arc<RpcContext>, Arc<FakeAlertSink>) {
        let mut config = Config::default();
        config.store.root = dir.path().to_path_buf();
        let (state, _) = MonitorState::open(&config).expect("open");
        let alerts = Arc::new(FakeAlertSink::default());
        let ctx = RpcContext {
            store: state.queries(),
            state: Arc::new(Mutex::new(state)),
            alert_sink: Arc::clone(&alerts) as Arc<dyn AlertSink>,
            auth: Authorizer::new(["mods".to_string()]),
            queries: QueryConfig::default(),
        };
        (Arc::new(ctx), alerts)
    }

    async fn ingest(ctx: &RpcContext, content: &str, at: DateTime<Utc>) -> serde_json::Value {
        dispatch(
            ctx,
            "ingest",
            json!({
                "sender_id": "bot",
                "channel_id": "hb",
                "content": content,
                "received_at": at,
            }),
        )
        .await
        .expect("ingest")
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, _) = context(&dir);
        let err = dispatch(&ctx, "list_panes", json!({})).await.expect_err("unknown");
        assert_eq!(err.code(), -32601);
    }

    #[tokio::test]
    async fn bad_params_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, _) = context(&dir);
        let err = dispatch(&ctx, "check", json!({})).await.expect_err("missing id");
        assert_eq!(err.code(), -32602);
        let err = dispatch(&ctx, "check", json!({"worker_id": "nobody"}))
            .await
            .expect_err("no digits");
        assert_eq!(err.code(), -32602);
        let err = dispatch(&ctx, "chart", json!({"kind": "scatter"}))
            .await
            .expect_err("unknown kind");
        assert_eq!(err.code(), -32602);
        let err = dispatch(&ctx, "chart", json!({"kind": "line"}))
            .await
            .expect_err("missing subject");
        assert_eq!(err.code(), -32602);
    }

    #[tokio::test]
    async fn ingest_then_check_by_mention() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, _) = context(&dir);
        let now = Utc::now();
        let first = ingest(&ctx, "<123>\n1 2 3 4\n\n10 50", now).await;
        assert_eq!(first["outcome"], "recorded");
        ingest(&ctx, "<123>\n1 2 3 4\n\n20 90", now + Duration::seconds(30)).await;

        let status = dispatch(&ctx, "check", json!({"worker_id": "<@123>"}))
            .await
            .expect("check");
        assert_eq!(status["lifetime"]["acquired"], 40);

        let missing = dispatch(&ctx, "check", json!({"worker_id": "999"}))
            .await
            .expect("check");
        assert!(missing.is_null());
    }

    #[tokio::test]
    async fn alerts_reach_the_sink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, alerts) = context(&dir);
        let outcome = ingest(&ctx, "<9>\n1 2 3 4\n\n60 10", Utc::now()).await;
        assert_eq!(outcome["alert"]["kind"]["kind"], "low_rate");
        let sent = alerts.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].worker_id.as_str(), "9");
    }

    #[tokio::test]
    async fn admin_operations_require_a_moderator_role() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, _) = context(&dir);
        let denied = dispatch(
            &ctx,
            "confirm",
            json!({"user_id": "5", "confirmer_id": "77", "roles": ["guest"]}),
        )
        .await
        .expect_err("denied");
        assert_eq!(denied.code(), -32001);

        let confirmed = dispatch(
            &ctx,
            "confirm",
            json!({"user_id": "<@5>", "confirmer_id": "77", "roles": ["mods"]}),
        )
        .await
        .expect("confirm");
        assert_eq!(confirmed["user_id"], "5");
        assert_eq!(confirmed["event"][0], 1);

        let retracted = dispatch(
            &ctx,
            "retract",
            json!({"user_id": "5", "confirmer_id": "77", "roles": ["mods"]}),
        )
        .await
        .expect("retract");
        assert_eq!(retracted["result"]["outcome"], "removed");

        let retired = dispatch(&ctx, "retire", json!({"worker_id": "5", "roles": ["mods"]}))
            .await
            .expect("retire");
        assert_eq!(retired["telemetry"]["status"], "missing");
    }

    #[tokio::test]
    async fn bulk_queries_run_while_the_monitor_is_locked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, _) = context(&dir);
        let now = Utc::now();
        ingest(&ctx, "<1>\n1 2 3 4\n\n10 50", now).await;
        ingest(&ctx, "<1>\n1 2 3 4\n\n20 90", now + Duration::seconds(30)).await;

        let _ingest_in_progress = ctx.state.lock().await;
        for method in ["totals", "top", "testers", "inactive"] {
            tokio::time::timeout(
                std::time::Duration::from_secs(5),
                dispatch(&ctx, method, json!({})),
            )
            .await
            .expect("query waited on the monitor lock")
            .expect(method);
        }
        let totals = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            dispatch(&ctx, "totals", json!({})),
        )
        .await
        .expect("query waited on the monitor lock")
        .expect("totals");
        assert_eq!(totals["workers"], 1);
        assert_eq!(totals["acquired"], 40);
    }

    #[tokio::test]
    async fn chart_without_data_is_null() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, _) = context(&dir);
        let chart = dispatch(&ctx, "chart", json!({"kind": "density"}))
            .await
            .expect("chart");
        assert!(chart.is_null());
    }

    #[tokio::test]
    async fn serves_requests_over_the_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, _) = context(&dir);
        let socket = dir.path().join("run").join("hbmond.sock");
        let socket = socket.to_str().expect("utf-8 path").to_string();
        let cancel = CancellationToken::new();

        let server = tokio::spawn({
            let socket = socket.clone();
            let cancel = cancel.clone();
            async move { run_server(&socket, ctx, cancel).await }
        });
        for _ in 0..50 {
            if std::path::Path::new(&socket).exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let totals = crate::client::rpc_call(&socket, "totals", json!({}))
            .await
            .expect("totals");
        assert_eq!(totals["workers"], 0);

        let err = crate::client::rpc_call(&socket, "nope", json!({}))
            .await
            .expect_err("rpc error");
        assert!(err.to_string().contains("-32601"));

        cancel.cancel();
        server.await.expect("join").expect("server");
    }
}
