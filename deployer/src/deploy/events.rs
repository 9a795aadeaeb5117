//! Per-attempt event bus feeding the console and the relay

use std::sync::{Arc, Mutex};

use relay_models::{Outcome, RelayFrame, Step, StepStatus};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Frames buffered per live subscriber before it starts lagging
const CHANNEL_CAPACITY: usize = 256;

/// Publishes step boundaries and log lines for one attempt.
///
/// Every frame is kept in a history so late subscribers can replay what they
/// missed before following the live stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RelayFrame>,
    history: Arc<Mutex<Vec<RelayFrame>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn publish(&self, frame: RelayFrame) {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.push(frame.clone());
        // No receivers is fine
        let _ = self.sender.send(frame);
    }

    /// Informational log line
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        self.publish(RelayFrame::log(line));
    }

    /// Warning log line, prefixed `WARN:`
    pub fn warn(&self, line: impl Into<String>) {
        let line = line.into();
        warn!("{}", line);
        self.publish(RelayFrame::log(format!("WARN: {}", line)));
    }

    /// Error log line, prefixed `ERROR:`
    pub fn error(&self, line: impl Into<String>) {
        let line = line.into();
        error!("{}", line);
        self.publish(RelayFrame::log(format!("ERROR: {}", line)));
    }

    /// Step boundary
    pub fn step(&self, step: Step, status: StepStatus, message: Option<String>) {
        self.publish(RelayFrame::Step {
            step,
            status,
            message,
        });
    }

    /// Final frame of the attempt
    pub fn finish(&self, outcome: Outcome, error: Option<String>) {
        self.publish(RelayFrame::Finished { outcome, error });
    }

    /// History so far plus a receiver for everything after it, with no gap
    /// and no duplicate between the two
    pub fn subscribe(&self) -> (Vec<RelayFrame>, broadcast::Receiver<RelayFrame>) {
        let history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        (history.clone(), self.sender.subscribe())
    }

    /// Copy of every frame published so far
    pub fn history(&self) -> Vec<RelayFrame> {
        self.subscribe().0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
