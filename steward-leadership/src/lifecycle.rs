use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use steward_core::coordination::Connector;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tracing::{debug, error, info, warn};

use crate::config::{DutyFailurePolicy, ElectionConfig};
use crate::duties::DutyCallbacks;
use crate::errors::{LeadershipError, Result};
use crate::health::{DeploymentMode, HealthReport, LeadershipProbe};
use crate::session::{FailureFeed, LeadershipSession, SessionHandle};
use crate::state_machine::LeadershipState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Starts and stops leadership participation for an embedding application.
///
/// With a coordination address configured, `start` joins the election and duties run
/// whenever this instance leads. Without one, duties start directly and the instance
/// leads until `stop`.
pub struct LifecycleDriver {
    config: ElectionConfig,
    connector: Arc<dyn Connector>,
    duties: Arc<dyn DutyCallbacks>,
    phase: Mutex<Phase>,
    running: AtomicBool,
    initialized: OnceCell<()>,
    session: OnceLock<SessionHandle>,
    // single-instance mode only
    standalone_leading: AtomicBool,
    failures_tx: mpsc::UnboundedSender<LeadershipError>,
    failures_rx: Mutex<mpsc::UnboundedReceiver<LeadershipError>>,
}

impl LifecycleDriver {
    pub fn new(
        config: ElectionConfig,
        connector: Arc<dyn Connector>,
        duties: Arc<dyn DutyCallbacks>,
    ) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector,
            duties,
            phase: Mutex::new(Phase::Idle),
            running: AtomicBool::new(false),
            initialized: OnceCell::new(),
            session: OnceLock::new(),
            standalone_leading: AtomicBool::new(false),
            failures_tx,
            failures_rx: Mutex::new(failures_rx),
        }
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn mode(&self) -> DeploymentMode {
        if self.config.is_distributed() {
            DeploymentMode::Distributed
        } else {
            DeploymentMode::SingleInstance
        }
    }

    /// Begin participating. Calling it again while running is a no-op.
    ///
    /// Returns a fatal startup error when the coordination service cannot be reached
    /// within the retry budget; in single-instance mode a failing duties-start is
    /// returned as is.
    pub async fn start(&self) -> Result<()> {
        let mut phase = self.phase.lock().await;
        match *phase {
            Phase::Running => return Ok(()),
            Phase::Stopped => return Err(LeadershipError::ControllerGone),
            Phase::Idle => {}
        }

        self.initialized
            .get_or_init(|| async { self.duties.initialize().await })
            .await;

        match self.config.session_options() {
            None => {
                info!(
                    contender = %self.config.contender_id,
                    "no coordination service configured, running as the single instance"
                );
                self.duties.on_leadership_taken().await.map_err(LeadershipError::DutyStart)?;
                self.standalone_leading.store(true, Ordering::SeqCst);
            }
            Some(options) => {
                let session =
                    LeadershipSession::join(self.connector.as_ref(), &options, self.duties.clone())
                        .await?;
                self.watch_failures(session.failure_feed());
                // a driver joins at most once, see the Stopped phase above
                let _ = self.session.set(session);
            }
        }

        *phase = Phase::Running;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop participating: duties-stop runs first if this instance leads, then the
    /// contender leaves the election and the shutdown hook runs. Calling it more than
    /// once is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut phase = self.phase.lock().await;
        if *phase == Phase::Stopped {
            debug!(contender = %self.config.contender_id, "lifecycle driver already stopped");
            return Ok(());
        }

        let was_running = *phase == Phase::Running;
        let shutdown = match self.session.get() {
            Some(session) => {
                let was_leading = session.is_leading();
                session.leave().await?;
                was_running && was_leading
            }
            None => {
                if self.standalone_leading.swap(false, Ordering::SeqCst) {
                    self.duties.on_leadership_suspended().await;
                }
                was_running
            }
        };
        if shutdown {
            self.duties.on_shutdown().await;
        }

        *phase = Phase::Stopped;
        self.running.store(false, Ordering::SeqCst);
        info!(contender = %self.config.contender_id, "lifecycle driver stopped");
        Ok(())
    }

    /// Truthful at all times: Suspended and Reinitializing report `false`.
    pub fn is_leading(&self) -> bool {
        match self.session.get() {
            Some(session) => session.is_leading(),
            None => self.standalone_leading.load(Ordering::SeqCst),
        }
    }

    pub fn state(&self) -> LeadershipState {
        match self.session.get() {
            Some(session) => session.state(),
            None if self.standalone_leading.load(Ordering::SeqCst) => LeadershipState::Leading,
            None => LeadershipState::Standby,
        }
    }

    /// Session of the distributed mode, once started.
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.get()
    }

    /// Next duties-start failure reported by the controller.
    pub async fn next_failure(&self) -> Option<LeadershipError> {
        self.failures_rx.lock().await.recv().await
    }

    pub async fn health(&self) -> HealthReport {
        let running = self.running.load(Ordering::SeqCst);
        let leading = self.is_leading();

        let (healthy, leader) = match self.session.get() {
            Some(session) => {
                let leader = match session.current_leader().await {
                    Ok(leader) => leader,
                    Err(err) => {
                        debug!(error = %err, "cannot resolve the current leader");
                        None
                    }
                };
                (running && session.is_running(), leader)
            }
            None => (running, leading.then(|| self.config.contender_id.clone())),
        };

        HealthReport {
            identity: self.config.contender_id.clone(),
            mode: self.mode(),
            state: self.state(),
            leading,
            healthy,
            leader,
        }
    }

    // Relay duties-start failures to the embedder and apply the failure policy.
    // The task holds a failure feed, not a session handle, so dropping the driver
    // still relinquishes.
    fn watch_failures(&self, feed: FailureFeed) {
        let failures = self.failures_tx.clone();
        let policy = self.config.duty_failure_policy;
        let contender = self.config.contender_id.clone();
        tokio::spawn(async move {
            while let Some(err) = feed.next().await {
                match policy {
                    DutyFailurePolicy::Isolate => {
                        warn!(contender = %contender, error = %err, "duties failed, contending again");
                        let _ = failures.send(err);
                    }
                    DutyFailurePolicy::Fatal => {
                        error!(contender = %contender, error = %err, "duties failed, leaving the election");
                        feed.leave().await;
                        let _ = failures.send(err);
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl LeadershipProbe for LifecycleDriver {
    fn is_leading(&self) -> bool {
        LifecycleDriver::is_leading(self)
    }

    async fn health(&self) -> HealthReport {
        LifecycleDriver::health(self).await
    }
}
