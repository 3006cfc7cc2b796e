//! Progress reporting for long-running queries.
//!
//! The observer runs on its own dispatcher task; the engine hands events over
//! a bounded channel with a non-blocking send, so a slow observer drops
//! updates instead of stalling the paging pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::wire::QueryStats;

/// Consumer-provided callback, invoked with the query id and the latest
/// server stats at most once per configured period, plus once on every state
/// change and once at submission.
pub trait ProgressObserver: Send + Sync + 'static {
    fn update(&self, progress: ProgressInfo);
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub query_id: String,
    pub stats: QueryStats,
}

pub(crate) struct ProgressTracker {
    tx: mpsc::Sender<ProgressInfo>,
    period: Duration,
    query_id: String,
    last_callback: Option<Instant>,
    last_state: String,
}

impl ProgressTracker {
    pub(crate) fn new(
        observer: Arc<dyn ProgressObserver>,
        period: Duration,
        query_id: String,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<ProgressInfo>(1);
        tokio::spawn(async move {
            while let Some(info) = rx.recv().await {
                observer.update(info);
            }
        });
        ProgressTracker {
            tx,
            period,
            query_id,
            last_callback: None,
            last_state: String::new(),
        }
    }

    /// Schedule a callback for the given page stats. Suppressed when the
    /// period has not elapsed and the query state is unchanged.
    pub(crate) fn observe(&mut self, stats: &QueryStats) {
        let now = Instant::now();
        if let Some(last) = self.last_callback {
            if now.duration_since(last) < self.period && stats.state == self.last_state {
                return;
            }
        }
        let info = ProgressInfo {
            query_id: self.query_id.clone(),
            stats: stats.clone(),
        };
        if self.tx.try_send(info).is_err() {
            tracing::debug!(query_id = %self.query_id, "progress observer lagging, dropping update");
        }
        self.last_callback = Some(now);
        self.last_state = stats.state.clone();
    }
}
