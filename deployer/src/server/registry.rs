//! In-memory registry of attempts started through the relay

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use relay_models::{DeploymentSummary, RelayFrame, StepStatus};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::deploy::events::EventBus;

/// One attempt: its live summary, its event bus and its cancel handle
pub struct DeploymentEntry {
    id: Uuid,
    summary: RwLock<DeploymentSummary>,
    bus: EventBus,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl DeploymentEntry {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn summary(&self) -> DeploymentSummary {
        self.summary.read().await.clone()
    }

    pub async fn is_finished(&self) -> bool {
        self.summary.read().await.outcome.is_some()
    }

    /// Fold one frame into the live summary
    pub async fn apply(&self, frame: &RelayFrame) {
        let mut summary = self.summary.write().await;
        match frame {
            RelayFrame::Step {
                step,
                status: StepStatus::Started,
                ..
            } => summary.current_step = Some(*step),
            RelayFrame::Finished { outcome, error } => {
                summary.outcome = Some(*outcome);
                summary.error = error.clone();
                summary.finished_at = Some(Utc::now());
            }
            _ => {}
        }
    }

    /// Replace the summary with the attempt's final state
    pub async fn complete(&self, summary: DeploymentSummary) {
        *self.summary.write().await = summary;
        self.cancel.lock().await.take();
    }

    /// Ask the running attempt to abort. False when it already finished or
    /// was already cancelled.
    pub async fn cancel(&self) -> bool {
        match self.cancel.lock().await.take() {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }
}

pub struct Registry {
    entries: RwLock<VecDeque<Arc<DeploymentEntry>>>,
    history_limit: usize,
}

impl Registry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            history_limit,
        }
    }

    /// Register a new attempt. Returns the entry and the receiver that
    /// resolves when the attempt is cancelled.
    pub async fn insert(
        &self,
        summary: DeploymentSummary,
        bus: EventBus,
    ) -> (Arc<DeploymentEntry>, oneshot::Receiver<()>) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let entry = Arc::new(DeploymentEntry {
            id: summary.id,
            summary: RwLock::new(summary),
            bus,
            cancel: Mutex::new(Some(cancel_tx)),
        });

        let mut entries = self.entries.write().await;
        entries.push_front(entry.clone());
        self.evict(&mut entries).await;
        (entry, cancel_rx)
    }

    /// Drop the oldest finished attempts beyond the history limit. Running
    /// attempts are never evicted.
    async fn evict(&self, entries: &mut VecDeque<Arc<DeploymentEntry>>) {
        let mut index = entries.len();
        while entries.len() > self.history_limit && index > 0 {
            index -= 1;
            if entries[index].is_finished().await {
                if let Some(evicted) = entries.remove(index) {
                    debug!("Evicted attempt {} from the registry", evicted.id());
                }
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<DeploymentEntry>> {
        let entries = self.entries.read().await;
        entries.iter().find(|e| e.id == id).cloned()
    }

    /// Summaries, newest first
    pub async fn list(&self) -> Vec<DeploymentSummary> {
        let entries = self.entries.read().await;
        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            summaries.push(entry.summary().await);
        }
        summaries
    }
}
