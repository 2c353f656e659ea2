use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use steward_core::coordination::{
    join_path, ConnectionSettings, ConnectionState, ConnectionStateStream, Connector,
    CoordinationClient, CoordinationError, RetryPolicy,
};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{info, warn};

use crate::controller::{Command, Controller, ControllerParts, Input};
use crate::duties::DutyCallbacks;
use crate::errors::{LeadershipError, Result};
use crate::self_watch::{lowest, order_contenders, ContenderNode, SelfWatch};
use crate::state_machine::LeadershipState;

/// Everything a contender needs to join an election.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Identity stored in the contender node, e.g. `host/pid`.
    pub identity: String,
    /// Path under which every contender for this duty registers.
    pub election_path: String,
    pub connection: ConnectionSettings,
    /// Retry policy for coordination operations, connection included.
    pub retry: RetryPolicy,
    /// Fixed pause between predecessor-watch attempts.
    pub watch_retry_interval: Duration,
}

/// Entry point for joining an election.
pub struct LeadershipSession;

impl LeadershipSession {
    /// Connect, register a contender node and start contending in `Standby`.
    ///
    /// Failing to connect (or to register) within the retry budget is a fatal startup
    /// error: the caller must not serve duties without confirmed participation.
    pub async fn join(
        connector: &dyn Connector,
        options: &SessionOptions,
        callbacks: Arc<dyn DutyCallbacks>,
    ) -> Result<SessionHandle> {
        let startup = |source: CoordinationError| LeadershipError::Startup {
            address: options.connection.address.clone(),
            source,
        };

        let settings = &options.connection;
        let client = options
            .retry
            .run("connect", move || async move {
                match tokio::time::timeout(settings.connection_timeout, connector.connect(settings))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(CoordinationError::Unreachable(settings.address.clone())),
                }
            })
            .await
            .map_err(startup)?;
        info!(address = %settings.address, "connected to the coordination service");

        // subscribe before registering so no connection change is missed
        let states = client.connection_states();

        let path = options.election_path.as_str();
        let identity = options.identity.as_str();
        let registering = &client;
        let name = options
            .retry
            .run("create_ephemeral_sequential", move || {
                registering.create_ephemeral_sequential(path, identity)
            })
            .await
            .map_err(startup)?;
        let own = ContenderNode::parse(&name).ok_or(LeadershipError::NodeMissing(name))?;
        info!(
            contender = %options.identity,
            path = %options.election_path,
            node = %own.name,
            "joined the election"
        );

        let (commands_tx, commands_rx) = mpsc::channel(8);
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LeadershipState::Standby);

        let forwarder = tokio::spawn(forward_connection_states(states, inputs_tx.clone()));

        // the initial connection has already happened; evaluate standing right away
        let _ = inputs_tx.send(Input::Connection(ConnectionState::Connected));

        let controller = Controller::new(ControllerParts {
            identity: options.identity.clone(),
            election_path: options.election_path.clone(),
            client: client.clone(),
            retry: options.retry,
            self_watch: SelfWatch::new(
                client.clone(),
                &options.identity,
                &options.election_path,
                options.retry.max_retries(),
                options.watch_retry_interval,
            ),
            callbacks,
            own,
            published: state_tx,
            failures: failures_tx,
            inputs: inputs_tx,
        });
        tokio::spawn(controller.run(commands_rx, inputs_rx, forwarder));

        Ok(SessionHandle {
            identity: options.identity.clone(),
            election_path: options.election_path.clone(),
            client,
            commands: commands_tx,
            state: state_rx,
            failures: Arc::new(Mutex::new(failures_rx)),
        })
    }
}

// Relay connection changes to the controller. A lagged stream may have dropped a
// Suspended or Lost, so a gap is replayed as a suspension followed by a reconnect:
// duties stop and standing is re-established from the service.
async fn forward_connection_states(
    mut states: ConnectionStateStream,
    inputs: mpsc::UnboundedSender<Input>,
) {
    while let Some(item) = states.next().await {
        let replay = match item {
            Ok(state) => vec![state],
            Err(err) => {
                warn!(error = %err, "connection state stream gap, resynchronizing");
                vec![ConnectionState::Suspended, ConnectionState::Reconnected]
            }
        };
        for state in replay {
            if inputs.send(Input::Connection(state)).is_err() {
                return;
            }
        }
    }
}

/// Handle to a running contender. Cloning shares the same contender.
///
/// Dropping every handle relinquishes leadership as if [`leave`](Self::leave) was called.
#[derive(Clone)]
pub struct SessionHandle {
    identity: String,
    election_path: String,
    client: Arc<dyn CoordinationClient>,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<LeadershipState>,
    failures: Arc<Mutex<mpsc::UnboundedReceiver<LeadershipError>>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &self.identity)
            .field("election_path", &self.election_path)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn election_path(&self) -> &str {
        &self.election_path
    }

    /// Identifier of the coordination client backing this contender.
    pub fn client_id(&self) -> &str {
        self.client.client_id()
    }

    /// Last published state. Suspended and Reinitializing are never reported as leading.
    pub fn state(&self) -> LeadershipState {
        *self.state.borrow()
    }

    pub fn is_leading(&self) -> bool {
        self.state().is_leading()
    }

    /// Whether the controller is still contending.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Receiver notified on every published state change.
    pub fn subscribe(&self) -> watch::Receiver<LeadershipState> {
        self.state.clone()
    }

    /// Identity of the contender the service ordering currently makes leader.
    pub async fn current_leader(&self) -> Result<Option<String>> {
        let children = self.client.list_children(&self.election_path).await?;
        let ordered = order_contenders(&children);
        let Some(leader) = lowest(&ordered) else {
            return Ok(None);
        };
        let node_path = join_path(&[&self.election_path, &leader.name]);
        Ok(self.client.get_data(&node_path).await?)
    }

    /// Next duties-start failure, `None` once the controller has stopped.
    pub async fn next_failure(&self) -> Option<LeadershipError> {
        self.failures.lock().await.recv().await
    }

    // Failure stream for background relays; it does not keep the contender alive.
    pub(crate) fn failure_feed(&self) -> FailureFeed {
        FailureFeed {
            failures: self.failures.clone(),
            commands: self.commands.downgrade(),
        }
    }

    /// Relinquish leadership and leave the election.
    ///
    /// Runs duties-stop first when leading, then deletes the contender node and closes
    /// the session. Calling it again after it completed is a no-op.
    pub async fn leave(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Relinquish(done_tx)).await.is_err() {
            return Ok(());
        }
        // a dropped reply means an earlier leave already closed the controller
        let _ = done_rx.await;
        Ok(())
    }

    /// [`leave`](Self::leave) bounded by `timeout`. On timeout the relinquish request
    /// stays queued and completes in the background.
    pub async fn leave_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.leave())
            .await
            .map_err(|_| LeadershipError::LeaveTimedOut(timeout))?
    }
}

/// Duties-start failures of a contender, held without a strong session handle so the
/// contender still relinquishes once every [`SessionHandle`] is dropped.
pub(crate) struct FailureFeed {
    failures: Arc<Mutex<mpsc::UnboundedReceiver<LeadershipError>>>,
    commands: mpsc::WeakSender<Command>,
}

impl FailureFeed {
    /// `None` once the controller has stopped.
    pub(crate) async fn next(&self) -> Option<LeadershipError> {
        self.failures.lock().await.recv().await
    }

    /// Leave the election unless every handle already let it go.
    pub(crate) async fn leave(&self) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        let sent = commands.send(Command::Relinquish(done_tx)).await.is_ok();
        drop(commands);
        if sent {
            let _ = done_rx.await;
        }
    }
}
