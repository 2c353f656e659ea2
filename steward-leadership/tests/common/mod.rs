//! Shared test helpers for `steward-leadership` integration tests.
//!
//! Contenders run against a [`MemoryCoordinator`] with short retry intervals and a
//! long session timeout, so sessions only expire when a test asks for it. Duty
//! callbacks are recorded per contender, and a cluster-wide [`DutyLedger`] tracks how
//! many contenders run duties at the same time.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use steward_core::coordination::{ConnectionSettings, MemoryCoordinator, RetryPolicy};
use steward_leadership::{
    DutyCallbacks, DutyError, ElectionConfig, LeadershipSession, LeadershipState, SessionHandle,
    SessionOptions,
};

pub const ADDRESS: &str = "memory://test-cluster";
pub const ELECTION_PATH: &str = "/steward/test/leader";
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyEvent {
    Initialized,
    Taken,
    Stopped,
    ShutDown,
}

/// Counts contenders running duties across the whole cluster.
#[derive(Debug, Default)]
pub struct DutyLedger {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl DutyLedger {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of contenders ever running duties simultaneously.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Duty callbacks that record every call and can be told to fail duties-start.
pub struct RecordingDuties {
    journal: Mutex<Vec<DutyEvent>>,
    ledger: Arc<DutyLedger>,
    failing_starts: AtomicUsize,
}

impl RecordingDuties {
    pub fn new(ledger: Arc<DutyLedger>) -> Arc<Self> {
        Arc::new(Self {
            journal: Mutex::new(Vec::new()),
            ledger,
            failing_starts: AtomicUsize::new(0),
        })
    }

    /// The next `count` duties-start calls fail.
    pub fn fail_starts(&self, count: usize) {
        self.failing_starts.store(count, Ordering::SeqCst);
    }

    pub fn journal(&self) -> Vec<DutyEvent> {
        self.journal.lock().unwrap().clone()
    }

    pub fn count(&self, event: DutyEvent) -> usize {
        self.journal().iter().filter(|e| **e == event).count()
    }

    fn record(&self, event: DutyEvent) {
        self.journal.lock().unwrap().push(event);
    }
}

#[async_trait]
impl DutyCallbacks for RecordingDuties {
    async fn initialize(&self) {
        self.record(DutyEvent::Initialized);
    }

    async fn on_leadership_taken(&self) -> Result<(), DutyError> {
        let remaining = self.failing_starts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_starts.store(remaining - 1, Ordering::SeqCst);
            return Err("duties refused to start".into());
        }

        let active = self.ledger.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.max_active.fetch_max(active, Ordering::SeqCst);
        self.record(DutyEvent::Taken);
        Ok(())
    }

    async fn on_leadership_suspended(&self) {
        self.ledger.active.fetch_sub(1, Ordering::SeqCst);
        self.record(DutyEvent::Stopped);
    }

    async fn on_shutdown(&self) {
        self.record(DutyEvent::ShutDown);
    }
}

/// Route controller logs to the test output; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn options(identity: &str) -> SessionOptions {
    init_tracing();
    SessionOptions {
        identity: identity.to_string(),
        election_path: ELECTION_PATH.to_string(),
        connection: ConnectionSettings {
            address: ADDRESS.to_string(),
            connection_timeout: Duration::from_millis(500),
            session_timeout: Duration::from_secs(60),
        },
        retry: RetryPolicy::new(3, Duration::from_millis(10)),
        watch_retry_interval: Duration::from_millis(10),
    }
}

/// Election config for a [`steward_leadership::LifecycleDriver`]; `None` address means
/// single-instance mode.
pub fn election_config(identity: &str, address: Option<&str>) -> ElectionConfig {
    init_tracing();
    ElectionConfig {
        coordination_addr: address.map(str::to_string),
        connection_timeout: Duration::from_millis(500),
        session_timeout: Duration::from_secs(60),
        connection_retries: 3,
        retry_sleep: Duration::from_millis(10),
        watch_retry_interval: Duration::from_millis(10),
        election_path: ELECTION_PATH.to_string(),
        contender_id: identity.to_string(),
        ..ElectionConfig::default()
    }
}

pub struct Contender {
    pub session: SessionHandle,
    pub duties: Arc<RecordingDuties>,
}

impl Contender {
    pub fn client_id(&self) -> String {
        self.session.client_id().to_string()
    }

    pub fn state(&self) -> LeadershipState {
        self.session.state()
    }
}

pub async fn join(coordinator: &MemoryCoordinator, identity: &str, ledger: &Arc<DutyLedger>) -> Contender {
    let duties = RecordingDuties::new(ledger.clone());
    let session = LeadershipSession::join(coordinator, &options(identity), duties.clone())
        .await
        .expect("join the election");
    Contender { session, duties }
}

/// Join `count` contenders one by one and wait until the first one leads and every
/// other one has armed its predecessor watch.
pub async fn start_cluster(
    coordinator: &MemoryCoordinator,
    count: usize,
    ledger: &Arc<DutyLedger>,
) -> Vec<Contender> {
    let mut contenders = Vec::with_capacity(count);
    for i in 0..count {
        contenders.push(join(coordinator, &format!("contender-{i}"), ledger).await);
    }
    wait_for_state(&contenders[0].session, LeadershipState::Leading).await;
    let expected = count as u64 - 1;
    eventually(|| coordinator.watches_installed() >= expected).await;
    contenders
}

/// Wait until the session publishes `state`.
pub async fn wait_for_state(session: &SessionHandle, state: LeadershipState) {
    let mut rx = session.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("{} never reached {state}, stuck in {}", session.identity(), session.state()))
        .expect("controller dropped the state channel");
}

/// Poll `condition` until it holds.
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Record every state a session publishes from now on.
pub fn record_states(session: &SessionHandle) -> Arc<Mutex<Vec<LeadershipState>>> {
    let seen = Arc::new(Mutex::new(vec![*session.subscribe().borrow()]));
    let mut rx = session.subscribe();
    let sink = seen.clone();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = *rx.borrow_and_update();
            sink.lock().unwrap().push(state);
        }
    });
    seen
}
