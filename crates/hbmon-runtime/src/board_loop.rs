//! Board loop: rebuilds the live board on a fixed period and upserts it
//! through the configured sink.
//! Runs as a tokio task until the cancellation token fires.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::monitor::{MonitorState, unix_secs};
use crate::sink::{BoardSink, MessageHandle};

/// Payload published once at startup, before the first rebuild.
pub const INITIAL_PAYLOAD: &str = "Initializing...";

/// Owns the sink and the handle of the message it keeps editing.
pub struct BoardPublisher {
    sink: Arc<dyn BoardSink>,
    handle: Option<MessageHandle>,
}

impl BoardPublisher {
    pub fn new(sink: Arc<dyn BoardSink>) -> Self {
        Self { sink, handle: None }
    }

    pub fn handle(&self) -> Option<&MessageHandle> {
        self.handle.as_ref()
    }

    /// Upsert `payload`. The handle is kept only when the sink succeeds, so a
    /// failed first publish is retried as a create.
    pub async fn publish(&mut self, payload: &str) -> anyhow::Result<()> {
        let handle = self.sink.upsert(self.handle.as_ref(), payload).await?;
        self.handle = Some(handle);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    /// The previous rebuild still holds the publisher.
    Skipped,
    Failed,
}

/// Run the board loop until `cancel` fires.
pub async fn run_board_loop(
    state: Arc<Mutex<MonitorState>>,
    publisher: Arc<Mutex<BoardPublisher>>,
    period: Duration,
    cancel: CancellationToken,
) {
    {
        let mut publisher = publisher.lock().await;
        match publisher.publish(INITIAL_PAYLOAD).await {
            Ok(()) => tracing::info!(
                handle = publisher.handle().map(|h| h.0.as_str()),
                "board message created"
            ),
            Err(e) => {
                tracing::warn!(sink = publisher.sink.name(), "initial board publish failed: {e}")
            }
        }
    }

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("board loop: cancellation requested, stopping");
                break;
            }
            _ = ticker.tick() => {
                let state = Arc::clone(&state);
                let publisher = Arc::clone(&publisher);
                tokio::spawn(async move {
                    board_tick(&state, publisher).await;
                });
            }
        }
    }
}

/// One rebuild. Skipped outright while an earlier rebuild is still
/// publishing; the monitor lock is released before the sink is called.
pub async fn board_tick(
    state: &Arc<Mutex<MonitorState>>,
    publisher: Arc<Mutex<BoardPublisher>>,
) -> TickOutcome {
    let Ok(mut publisher) = publisher.try_lock_owned() else {
        tracing::debug!("board update still in flight, skipping tick");
        return TickOutcome::Skipped;
    };

    let now = Utc::now();
    let inputs = {
        let mut st = state.lock().await;
        let pruned = st.alerts.prune_expired(unix_secs(now));
        if pruned > 0 {
            tracing::debug!(pruned, "expired alert cooldowns pruned");
        }
        st.board_inputs()
    };

    let snapshot = inputs.build(now);
    let payload = snapshot.render(inputs.policy.max_payload_chars);
    match publisher.publish(&payload).await {
        Ok(()) => {
            tracing::debug!(entries = snapshot.entries.len(), "board published");
            TickOutcome::Published
        }
        Err(e) => {
            tracing::warn!(sink = publisher.sink.name(), "board publish failed: {e}");
            TickOutcome::Failed
        }
    }
}
