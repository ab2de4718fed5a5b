//! UDS JSON-RPC client for CLI subcommands.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use hbmon_core::report::{
    RankedWorker, ServerTotals, TesterGroup, WorkerStatus, render_inactive, render_tester_groups,
    render_top,
};
use hbmon_core::{ChartData, RetractOutcome, TestEvent, WorkerId};
use hbmon_store::RetireReport;

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: serde_json::Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// Call `method` and print the formatted result.
pub async fn run(
    socket_path: &str,
    method: &str,
    params: serde_json::Value,
    format: impl FnOnce(serde_json::Value) -> anyhow::Result<String>,
) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, method, params).await?;
    println!("{}", format(result)?);
    Ok(())
}

// ─── Formatting ──────────────────────────────────────────────────

pub(crate) fn format_ingest(result: serde_json::Value) -> anyhow::Result<String> {
    Ok(serde_json::to_string(&result)?)
}

pub(crate) fn format_check(worker: &str, result: serde_json::Value) -> anyhow::Result<String> {
    if result.is_null() {
        return Ok(format!("No data found for User ID: {worker}"));
    }
    let status: WorkerStatus = serde_json::from_value(result)?;
    Ok(status.render())
}

pub(crate) fn format_inactive(result: serde_json::Value) -> anyhow::Result<String> {
    let days = result["days"].as_u64().unwrap_or_default();
    let workers: Vec<WorkerId> = serde_json::from_value(result["workers"].clone())?;
    Ok(render_inactive(&workers, days))
}

pub(crate) fn format_testers(result: serde_json::Value) -> anyhow::Result<String> {
    let groups: Vec<TesterGroup> = serde_json::from_value(result)?;
    Ok(render_tester_groups(&groups))
}

pub(crate) fn format_totals(result: serde_json::Value) -> anyhow::Result<String> {
    let totals: ServerTotals = serde_json::from_value(result)?;
    Ok(totals.render())
}

pub(crate) fn format_top(result: serde_json::Value) -> anyhow::Result<String> {
    let ranked: Vec<RankedWorker> = serde_json::from_value(result)?;
    Ok(render_top(&ranked))
}

pub(crate) fn format_chart(result: serde_json::Value, json: bool) -> anyhow::Result<String> {
    if result.is_null() {
        return Ok("No data available for the chart.".to_string());
    }
    if json {
        return Ok(serde_json::to_string_pretty(&result)?);
    }
    let chart: ChartData = serde_json::from_value(result)?;
    Ok(chart.summary())
}

pub(crate) fn format_board(result: serde_json::Value) -> anyhow::Result<String> {
    result["payload"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("board response carries no payload"))
}

pub(crate) fn format_confirm(result: serde_json::Value) -> anyhow::Result<String> {
    let user: WorkerId = serde_json::from_value(result["user_id"].clone())?;
    let event: TestEvent = serde_json::from_value(result["event"].clone())?;
    Ok(format!(
        "Pack test #{} confirmed for <@{user}> by <@{}>.",
        event.sequence_number, event.confirmer_id
    ))
}

pub(crate) fn format_retract(result: serde_json::Value) -> anyhow::Result<String> {
    let user: WorkerId = serde_json::from_value(result["user_id"].clone())?;
    let outcome: RetractOutcome = serde_json::from_value(result["result"].clone())?;
    Ok(match outcome {
        RetractOutcome::Removed { event } => format!(
            "Removed pack test #{} for <@{user}>.",
            event.sequence_number
        ),
        RetractOutcome::NothingToRetract => {
            format!("No pack test confirmed by you was found for <@{user}>.")
        }
    })
}

pub(crate) fn format_retire(result: serde_json::Value) -> anyhow::Result<String> {
    let report: RetireReport = serde_json::from_value(result)?;
    Ok(report.render())
}
