//! # Lifecycle Driver Tests
//!
//! The driver is what an embedding application sees: `start`, `stop`, `is_leading`
//! and a health report. Covers both deployment modes and both duty failure policies.

mod common;

use std::sync::Arc;

use common::{election_config, wait_for_state, DutyEvent, DutyLedger, RecordingDuties};
use steward_core::coordination::MemoryCoordinator;
use steward_leadership::{
    DeploymentMode, DutyFailurePolicy, LeadershipError, LeadershipProbe, LeadershipState,
    LifecycleDriver,
};

fn driver(
    coordinator: &MemoryCoordinator,
    identity: &str,
    address: Option<&str>,
    duties: &Arc<RecordingDuties>,
) -> LifecycleDriver {
    LifecycleDriver::new(
        election_config(identity, address),
        Arc::new(coordinator.clone()),
        duties.clone(),
    )
}

/// **What**: Without a coordination address, `start` runs duties directly.
///
/// **Why**: Single-instance deployments must keep the same callback contract as the
/// distributed path, without ever talking to a coordination service.
///
/// **Checks**:
/// - `is_leading` is true as soon as `start` returns
/// - no coordination operation was made
/// - `stop` runs duties-stop then the shutdown hook once, even when called twice
#[tokio::test]
async fn single_instance_bypasses_the_election() {
    let coordinator = MemoryCoordinator::new();
    let duties = RecordingDuties::new(Arc::new(DutyLedger::default()));
    let driver = driver(&coordinator, "solo", None, &duties);

    driver.start().await.unwrap();

    assert!(driver.is_leading());
    assert_eq!(driver.mode(), DeploymentMode::SingleInstance);
    assert_eq!(coordinator.operation_count(), 0);
    assert_eq!(duties.journal(), vec![DutyEvent::Initialized, DutyEvent::Taken]);

    let report = driver.health().await;
    assert!(report.healthy);
    assert_eq!(report.leader.as_deref(), Some("solo"));

    driver.stop().await.unwrap();
    driver.stop().await.unwrap();

    assert!(!driver.is_leading());
    assert_eq!(
        duties.journal(),
        vec![
            DutyEvent::Initialized,
            DutyEvent::Taken,
            DutyEvent::Stopped,
            DutyEvent::ShutDown
        ]
    );
    assert_eq!(coordinator.operation_count(), 0);
}

/// **What**: A single instance whose duties fail to start reports the failure from
/// `start` and does not claim leadership.
#[tokio::test]
async fn single_instance_start_failure_is_returned() {
    let coordinator = MemoryCoordinator::new();
    let duties = RecordingDuties::new(Arc::new(DutyLedger::default()));
    duties.fail_starts(1);
    let driver = driver(&coordinator, "solo", None, &duties);

    let err = driver.start().await.unwrap_err();

    assert!(matches!(err, LeadershipError::DutyStart(_)));
    assert!(!driver.is_leading());
    assert!(!driver.health().await.healthy);

    // a retry succeeds and initialization is not repeated
    driver.start().await.unwrap();
    assert!(driver.is_leading());
    assert_eq!(duties.count(DutyEvent::Initialized), 1);
}

/// **What**: Two distributed drivers elect one leader and hand over on `stop`.
#[tokio::test]
async fn distributed_drivers_hand_over_on_stop() {
    let coordinator = MemoryCoordinator::new();
    let ledger = Arc::new(DutyLedger::default());
    let first_duties = RecordingDuties::new(ledger.clone());
    let second_duties = RecordingDuties::new(ledger.clone());
    let first = driver(&coordinator, "first", Some(common::ADDRESS), &first_duties);
    let second = driver(&coordinator, "second", Some(common::ADDRESS), &second_duties);

    first.start().await.unwrap();
    wait_for_state(first.session().unwrap(), LeadershipState::Leading).await;
    second.start().await.unwrap();
    common::eventually(|| coordinator.watches_installed() == 1).await;

    let report = second.health().await;
    assert_eq!(report.mode, DeploymentMode::Distributed);
    assert!(report.healthy);
    assert!(!report.leading);
    assert_eq!(report.state, LeadershipState::Standby);
    assert_eq!(report.leader.as_deref(), Some("first"));

    first.stop().await.unwrap();
    wait_for_state(second.session().unwrap(), LeadershipState::Leading).await;

    assert!(!first.is_leading());
    assert!(!first.health().await.healthy);
    assert_eq!(
        first_duties.journal(),
        vec![
            DutyEvent::Initialized,
            DutyEvent::Taken,
            DutyEvent::Stopped,
            DutyEvent::ShutDown
        ]
    );
    assert_eq!(ledger.max_active(), 1);

    // the new leader has not been shut down by its predecessor's stop
    assert_eq!(second_duties.count(DutyEvent::ShutDown), 0);

    // a stopped driver cannot rejoin
    assert!(matches!(
        first.start().await,
        Err(LeadershipError::ControllerGone)
    ));
}

/// **What**: The health report serializes with the leadership state and leader.
#[tokio::test]
async fn health_report_serializes() {
    let coordinator = MemoryCoordinator::new();
    let duties = RecordingDuties::new(Arc::new(DutyLedger::default()));
    let driver = driver(&coordinator, "reporter", Some(common::ADDRESS), &duties);
    driver.start().await.unwrap();
    wait_for_state(driver.session().unwrap(), LeadershipState::Leading).await;

    let probe: &dyn LeadershipProbe = &driver;
    assert!(probe.is_leading());
    let json = serde_json::to_value(probe.health().await).unwrap();

    assert_eq!(json["identity"], "reporter");
    assert_eq!(json["mode"], "distributed");
    assert_eq!(json["state"], "leading");
    assert_eq!(json["leading"], true);
    assert_eq!(json["healthy"], true);
    assert_eq!(json["leader"], "reporter");
}

/// **What**: Under the isolate policy a duties-start failure is surfaced through
/// `next_failure` while the driver keeps contending.
#[tokio::test]
async fn isolated_duty_failure_keeps_contending() {
    let coordinator = MemoryCoordinator::new();
    let duties = RecordingDuties::new(Arc::new(DutyLedger::default()));
    duties.fail_starts(1);
    let driver = driver(&coordinator, "resilient", Some(common::ADDRESS), &duties);

    driver.start().await.unwrap();
    let failure = tokio::time::timeout(common::WAIT, driver.next_failure())
        .await
        .expect("failure reported");
    assert!(matches!(failure, Some(LeadershipError::DutyStart(_))));

    // alone in the election, the requeued contender is granted leadership again
    wait_for_state(driver.session().unwrap(), LeadershipState::Leading).await;
    assert!(driver.health().await.healthy);
    assert_eq!(duties.count(DutyEvent::Taken), 1);
}

/// **What**: Under the fatal policy a duties-start failure stops the driver.
///
/// **Checks**:
/// - the failure is reported
/// - the contender left the election and reports unhealthy
#[tokio::test]
async fn fatal_duty_failure_leaves_the_election() {
    let coordinator = MemoryCoordinator::new();
    let duties = RecordingDuties::new(Arc::new(DutyLedger::default()));
    duties.fail_starts(usize::MAX);
    let mut config = election_config("brittle", Some(common::ADDRESS));
    config.duty_failure_policy = DutyFailurePolicy::Fatal;
    let driver = LifecycleDriver::new(config, Arc::new(coordinator.clone()), duties.clone());

    driver.start().await.unwrap();
    let failure = tokio::time::timeout(common::WAIT, driver.next_failure())
        .await
        .expect("failure reported");
    assert!(matches!(failure, Some(LeadershipError::DutyStart(_))));

    common::eventually(|| !driver.session().unwrap().is_running()).await;
    assert!(!driver.health().await.healthy);
    assert!(!driver.is_leading());
    assert!(coordinator.children(common::ELECTION_PATH).is_empty());

    driver.stop().await.unwrap();
}

/// **What**: A fatal startup error from `start` leaves the driver idle and unhealthy.
#[tokio::test]
async fn distributed_start_fails_when_unreachable() {
    let coordinator = MemoryCoordinator::new();
    coordinator.set_reachable(false);
    let duties = RecordingDuties::new(Arc::new(DutyLedger::default()));
    let driver = driver(&coordinator, "stranded", Some(common::ADDRESS), &duties);

    let err = driver.start().await.unwrap_err();

    assert!(matches!(err, LeadershipError::Startup { .. }));
    assert!(!driver.is_leading());
    assert!(!driver.health().await.healthy);
    assert_eq!(duties.journal(), vec![DutyEvent::Initialized]);
}

/// **What**: The shutdown hook runs only for the contender leading at stop time.
///
/// **Why**: A follower never acquired the leader's resources, so it has nothing to
/// release; a single instance always holds them.
///
/// **Checks**:
/// - a stopped follower gets neither duties-stop nor the shutdown hook
/// - the leader gets duties-stop before the shutdown hook
/// - a single instance that never started gets no shutdown hook
#[tokio::test]
async fn shutdown_hook_follows_leadership() {
    let coordinator = MemoryCoordinator::new();
    let ledger = Arc::new(DutyLedger::default());
    let leader_duties = RecordingDuties::new(ledger.clone());
    let follower_duties = RecordingDuties::new(ledger.clone());
    let leader = driver(&coordinator, "leader", Some(common::ADDRESS), &leader_duties);
    let follower = driver(&coordinator, "follower", Some(common::ADDRESS), &follower_duties);

    leader.start().await.unwrap();
    wait_for_state(leader.session().unwrap(), LeadershipState::Leading).await;
    follower.start().await.unwrap();
    common::eventually(|| coordinator.watches_installed() == 1).await;

    follower.stop().await.unwrap();
    assert_eq!(follower_duties.journal(), vec![DutyEvent::Initialized]);

    leader.stop().await.unwrap();
    assert_eq!(
        leader_duties.journal(),
        vec![
            DutyEvent::Initialized,
            DutyEvent::Taken,
            DutyEvent::Stopped,
            DutyEvent::ShutDown
        ]
    );

    let idle_duties = RecordingDuties::new(ledger);
    let idle = driver(&coordinator, "idle", None, &idle_duties);
    idle.stop().await.unwrap();
    assert!(idle_duties.journal().is_empty());
}

/// **What**: A leading driver dropped without `stop` still relinquishes.
///
/// **Why**: Background tasks of the driver must not keep its contender alive; a
/// leaked leader would block every successor forever.
///
/// **Checks**:
/// - the dropped leader's duties are stopped
/// - its node is deleted and the follower takes over
#[tokio::test]
async fn dropped_driver_relinquishes() {
    let coordinator = MemoryCoordinator::new();
    let ledger = Arc::new(DutyLedger::default());
    let first_duties = RecordingDuties::new(ledger.clone());
    let second_duties = RecordingDuties::new(ledger.clone());
    let first = driver(&coordinator, "first", Some(common::ADDRESS), &first_duties);
    let second = driver(&coordinator, "second", Some(common::ADDRESS), &second_duties);

    first.start().await.unwrap();
    wait_for_state(first.session().unwrap(), LeadershipState::Leading).await;
    second.start().await.unwrap();
    common::eventually(|| coordinator.watches_installed() == 1).await;

    drop(first);

    wait_for_state(second.session().unwrap(), LeadershipState::Leading).await;
    assert_eq!(coordinator.children(common::ELECTION_PATH).len(), 1);
    assert_eq!(
        first_duties.journal(),
        vec![DutyEvent::Initialized, DutyEvent::Taken, DutyEvent::Stopped]
    );
    assert_eq!(ledger.max_active(), 1);
}
