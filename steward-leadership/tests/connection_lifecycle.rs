//! # Connection Lifecycle Tests
//!
//! Covers how contenders react to their coordination connection being suspended,
//! restored, or expired:
//!
//! - a suspended leader stops its duties before it reports `Suspended`;
//! - a reconnect always arms a fresh watch before leadership is claimed again;
//! - an expired leader falls back to standby and rejoins behind the new leader.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{join, record_states, start_cluster, wait_for_state, DutyEvent, DutyLedger};
use steward_core::coordination::MemoryCoordinator;
use steward_leadership::{LeadershipSession, LeadershipState};

/// **What**: Suspend the leader's connection.
///
/// **Checks**:
/// - duties-stop already ran when `Suspended` becomes observable
/// - `is_leading` is false while suspended
#[tokio::test]
async fn suspended_leader_stops_duties_first() {
    let coordinator = MemoryCoordinator::new();
    let ledger = Arc::new(DutyLedger::default());
    let cluster = start_cluster(&coordinator, 1, &ledger).await;
    let leader = &cluster[0];

    coordinator.suspend(&leader.client_id());
    wait_for_state(&leader.session, LeadershipState::Suspended).await;

    assert_eq!(leader.duties.journal(), vec![DutyEvent::Taken, DutyEvent::Stopped]);
    assert!(!leader.session.is_leading());
    assert_eq!(ledger.active(), 0);
}

/// **What**: A leader that reconnects before its session expires resumes duties,
/// going through `Reinitializing` first.
#[tokio::test]
async fn reconnected_leader_resumes_duties() {
    let coordinator = MemoryCoordinator::new();
    let ledger = Arc::new(DutyLedger::default());
    let cluster = start_cluster(&coordinator, 1, &ledger).await;
    let leader = &cluster[0];
    let states = record_states(&leader.session);

    coordinator.suspend(&leader.client_id());
    wait_for_state(&leader.session, LeadershipState::Suspended).await;
    coordinator.reconnect(&leader.client_id());
    wait_for_state(&leader.session, LeadershipState::Leading).await;

    assert_eq!(
        leader.duties.journal(),
        vec![DutyEvent::Taken, DutyEvent::Stopped, DutyEvent::Taken]
    );
    // the contender node survived the suspension
    assert_eq!(coordinator.children(common::ELECTION_PATH).len(), 1);

    let seen = states.lock().unwrap().clone();
    let suspended = seen.iter().position(|s| *s == LeadershipState::Suspended);
    let resumed = seen.iter().rposition(|s| *s == LeadershipState::Leading);
    assert!(suspended < resumed, "published states: {seen:?}");
}

/// **What**: A follower that reconnects re-arms its predecessor watch and does not
/// rely on the one installed before the disconnect.
///
/// **Checks**:
/// - a new watch is installed after the reconnect
/// - the follower still takes over exactly once when the leader leaves
#[tokio::test]
async fn reconnect_rearms_the_watch() {
    let coordinator = MemoryCoordinator::new();
    let ledger = Arc::new(DutyLedger::default());
    let cluster = start_cluster(&coordinator, 2, &ledger).await;
    let follower = &cluster[1];
    assert_eq!(coordinator.watches_installed(), 1);

    coordinator.suspend(&follower.client_id());
    coordinator.reconnect(&follower.client_id());
    common::eventually(|| coordinator.watches_installed() == 2).await;
    wait_for_state(&follower.session, LeadershipState::Standby).await;

    cluster[0].session.leave().await.unwrap();
    wait_for_state(&follower.session, LeadershipState::Leading).await;

    assert_eq!(follower.duties.journal(), vec![DutyEvent::Taken]);
    // the replaced watch was dropped, only the fresh one fired
    assert_eq!(coordinator.watches_fired(), 1);
}

/// **What**: Expire the leader's session and reconnect it afterwards.
///
/// **Checks**:
/// - the follower takes over once the expired node is gone
/// - the old leader lands on standby with a new node behind the new leader
/// - the old leader ran duties-stop exactly once
#[tokio::test]
async fn expired_leader_rejoins_behind_successor() {
    let coordinator = MemoryCoordinator::new();
    let ledger = Arc::new(DutyLedger::default());
    let cluster = start_cluster(&coordinator, 2, &ledger).await;
    let (old, new) = (&cluster[0], &cluster[1]);
    let old_node = coordinator.children(common::ELECTION_PATH)[0].clone();

    coordinator.expire(&old.client_id());
    wait_for_state(&new.session, LeadershipState::Leading).await;
    wait_for_state(&old.session, LeadershipState::Standby).await;
    assert_eq!(old.duties.journal(), vec![DutyEvent::Taken, DutyEvent::Stopped]);

    coordinator.reconnect(&old.client_id());
    common::eventually(|| coordinator.children(common::ELECTION_PATH).len() == 2).await;
    common::eventually(|| coordinator.watches_installed() == 2).await;

    common::eventually(|| old.state() == LeadershipState::Standby).await;

    let children = coordinator.children(common::ELECTION_PATH);
    assert!(!children.contains(&old_node));
    assert_eq!(old.duties.count(DutyEvent::Taken), 1);
    assert_eq!(ledger.max_active(), 1);
    assert_eq!(
        old.session.current_leader().await.unwrap().as_deref(),
        Some("contender-1")
    );
}

/// **What**: A suspended leader that never reconnects is expired by the service after
/// the session timeout, handing leadership to the next contender.
#[tokio::test]
async fn session_timeout_hands_over_leadership() {
    let coordinator = MemoryCoordinator::new();
    let ledger = Arc::new(DutyLedger::default());

    let mut options = common::options("short-lived");
    options.connection.session_timeout = Duration::from_millis(300);
    let duties = common::RecordingDuties::new(ledger.clone());
    let leader = LeadershipSession::join(&coordinator, &options, duties.clone())
        .await
        .unwrap();
    wait_for_state(&leader, LeadershipState::Leading).await;

    let follower = join(&coordinator, "patient", &ledger).await;
    common::eventually(|| coordinator.watches_installed() == 1).await;

    coordinator.suspend(leader.client_id());
    wait_for_state(&leader, LeadershipState::Suspended).await;
    wait_for_state(&follower.session, LeadershipState::Leading).await;
    wait_for_state(&leader, LeadershipState::Standby).await;

    assert_eq!(duties.journal(), vec![DutyEvent::Taken, DutyEvent::Stopped]);
    assert_eq!(ledger.max_active(), 1);
}

/// **What**: Operations failing while suspended are retried and then given up on,
/// leaving the contender on standby instead of leading under uncertainty.
#[tokio::test]
async fn exhausted_retries_fall_back_to_standby() {
    let coordinator = MemoryCoordinator::new();
    let ledger = Arc::new(DutyLedger::default());
    let cluster = start_cluster(&coordinator, 2, &ledger).await;
    let follower = &cluster[1];

    // the follower's session stays suspended while its predecessor leaves
    coordinator.suspend(&follower.client_id());
    cluster[0].session.leave().await.unwrap();

    // the watch fires, but re-evaluating standing fails on every attempt
    common::eventually(|| coordinator.watches_fired() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!follower.session.is_leading());
    assert!(follower.duties.journal().is_empty());

    coordinator.reconnect(&follower.client_id());
    wait_for_state(&follower.session, LeadershipState::Leading).await;
    assert_eq!(ledger.max_active(), 1);
}
