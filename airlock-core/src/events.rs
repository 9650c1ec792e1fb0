//! Event sink contract and the outbox dispatcher.
//!
//! Controller operations insert events into the outbox table inside their
//! own transaction; the dispatcher drains that table to an [`EventSink`]
//! after commit. A sink failure leaves the row undispatched and the
//! dispatcher retries on its next pass, giving at-least-once delivery
//! without ever blocking or failing a state transition.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use airlock_model::LifecycleEvent;

use crate::error::Result;
use crate::store::{Store, outbox};

/// Destination for lifecycle events (chat bridge, issue tracker, ...).
/// Sinks must tolerate duplicate delivery.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &LifecycleEvent) -> Result<()>;
}

/// Default sink: structured log lines, carrying the output-checking org/repo
/// hints when configured so downstream log routing can fan out on them.
#[derive(Debug, Default)]
pub struct TracingEventSink {
    pub org: Option<String>,
    pub repo: Option<String>,
}

impl TracingEventSink {
    pub fn new(org: Option<String>, repo: Option<String>) -> Self {
        Self { org, repo }
    }
}

#[async_trait]
impl EventSink for TracingEventSink {
    async fn deliver(&self, event: &LifecycleEvent) -> Result<()> {
        info!(
            kind = %event.kind,
            request_id = %event.request_id,
            workspace = %event.workspace,
            author = %event.author,
            actor = %event.actor,
            turn = event.review_turn,
            org = self.org.as_deref().unwrap_or(""),
            repo = self.repo.as_deref().unwrap_or(""),
            "lifecycle event"
        );
        Ok(())
    }
}

const DRAIN_BATCH: i64 = 50;

/// Background task draining the outbox to the configured sink.
#[derive(Clone)]
pub struct OutboxDispatcher {
    store: Store,
    sink: Arc<dyn EventSink>,
    nudge: Arc<Notify>,
}

impl std::fmt::Debug for OutboxDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxDispatcher").finish_non_exhaustive()
    }
}

impl OutboxDispatcher {
    pub fn new(store: Store, sink: Arc<dyn EventSink>, nudge: Arc<Notify>) -> Self {
        Self { store, sink, nudge }
    }

    pub fn nudge_handle(&self) -> Arc<Notify> {
        self.nudge.clone()
    }

    /// One pass over pending events; returns how many were delivered.
    pub async fn drain_once(&self) -> Result<usize> {
        let mut conn = self.store.pool().acquire().await.map_err(crate::store::map_db_err)?;
        let pending = outbox::fetch_undispatched(&mut *conn, DRAIN_BATCH).await?;
        let mut delivered = 0;
        for event in &pending {
            match self.sink.deliver(event).await {
                Ok(()) => {
                    outbox::mark_dispatched(&mut *conn, event.id, Utc::now()).await?;
                    delivered += 1;
                }
                Err(err) => {
                    // Leave the row for the next pass; delivery is
                    // best-effort and must never wedge the engine.
                    warn!(kind = %event.kind, request_id = %event.request_id, error = %err,
                          "event delivery failed; will retry");
                }
            }
        }
        Ok(delivered)
    }

    /// Run until shutdown, draining on nudges and on a slow heartbeat.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = self.nudge.notified() => {}
                _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                _ = shutdown.changed() => {
                    debug!("outbox dispatcher shutting down");
                    return;
                }
            }
            if let Err(err) = self.drain_once().await {
                warn!(error = %err, "outbox drain failed");
            }
        }
    }
}
