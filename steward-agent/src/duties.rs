use async_trait::async_trait;
use metrics::counter;
use std::time::Duration;
use steward_leadership::{DutyCallbacks, DutyError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub(crate) const DRAINED_ITEMS_TOTAL: &str = "steward_agent_drained_items_total";

/// Stand-in for privileged work: drains a work queue while this contender leads.
pub(crate) struct QueueDrainer {
    contender: String,
    interval: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueueDrainer {
    pub(crate) fn new(contender: impl Into<String>, interval: Duration) -> Self {
        QueueDrainer {
            contender: contender.into(),
            interval,
            worker: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DutyCallbacks for QueueDrainer {
    async fn initialize(&self) {
        debug!(contender = %self.contender, "queue drainer ready");
    }

    async fn on_leadership_taken(&self) -> Result<(), DutyError> {
        let mut worker = self.worker.lock().await;
        if let Some(previous) = worker.take() {
            previous.abort();
        }

        let contender = self.contender.clone();
        let mut ticker = tokio::time::interval(self.interval);
        *worker = Some(tokio::spawn(async move {
            let mut drained: u64 = 0;
            loop {
                ticker.tick().await;
                drained += 1;
                counter!(DRAINED_ITEMS_TOTAL).increment(1);
                debug!(contender = %contender, drained, "drained work item");
            }
        }));
        info!(contender = %self.contender, "queue drainer started");
        Ok(())
    }

    async fn on_leadership_suspended(&self) {
        if let Some(worker) = self.worker.lock().await.take() {
            worker.abort();
            info!(contender = %self.contender, "queue drainer stopped");
        }
    }
}
