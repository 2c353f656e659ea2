use std::collections::VecDeque;
use std::sync::Arc;
use steward_core::coordination::{
    join_path, ConnectionState, CoordinationClient, RetryPolicy, WatchOutcome,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::duties::DutyCallbacks;
use crate::errors::{LeadershipError, Result};
use crate::leadership_metrics;
use crate::self_watch::{ContenderNode, SelfWatch, Standing};
use crate::state_machine::{transition, Effect, LeadershipEvent, LeadershipState, Transition};

pub(crate) enum Command {
    Relinquish(oneshot::Sender<()>),
}

pub(crate) enum Input {
    Connection(ConnectionState),
    WatchFired { generation: u64, outcome: WatchOutcome },
}

enum Applied {
    Done,
    // queue a follow-up event after the current transition
    Follow(LeadershipEvent),
    // the transition failed: do not publish it and handle this event next
    Abort(LeadershipEvent),
}

/// Owns the leadership state of one contender and applies transitions one at a time.
///
/// Every input (connection change, watch fire, shutdown) is funneled through a single
/// task, so duty callbacks never run concurrently and never run twice in a row.
pub(crate) struct Controller {
    identity: String,
    election_path: String,
    client: Arc<dyn CoordinationClient>,
    retry: RetryPolicy,
    self_watch: SelfWatch,
    callbacks: Arc<dyn DutyCallbacks>,
    own: ContenderNode,
    state: LeadershipState,
    published: watch::Sender<LeadershipState>,
    failures: mpsc::UnboundedSender<LeadershipError>,
    inputs: mpsc::UnboundedSender<Input>,
    watch_task: Option<JoinHandle<()>>,
    generation: u64,
    closed: bool,
}

pub(crate) struct ControllerParts {
    pub(crate) identity: String,
    pub(crate) election_path: String,
    pub(crate) client: Arc<dyn CoordinationClient>,
    pub(crate) retry: RetryPolicy,
    pub(crate) self_watch: SelfWatch,
    pub(crate) callbacks: Arc<dyn DutyCallbacks>,
    pub(crate) own: ContenderNode,
    pub(crate) published: watch::Sender<LeadershipState>,
    pub(crate) failures: mpsc::UnboundedSender<LeadershipError>,
    pub(crate) inputs: mpsc::UnboundedSender<Input>,
}

impl Controller {
    pub(crate) fn new(parts: ControllerParts) -> Self {
        Self {
            identity: parts.identity,
            election_path: parts.election_path,
            client: parts.client,
            retry: parts.retry,
            self_watch: parts.self_watch,
            callbacks: parts.callbacks,
            own: parts.own,
            state: LeadershipState::Standby,
            published: parts.published,
            failures: parts.failures,
            inputs: parts.inputs,
            watch_task: None,
            generation: 0,
            closed: false,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<Input>,
        forwarder: JoinHandle<()>,
    ) {
        let mut pending = VecDeque::new();

        while !self.closed {
            let mut reply = None;
            tokio::select! {
                biased;
                command = commands.recv() => {
                    match command {
                        Some(Command::Relinquish(done)) => reply = Some(done),
                        // every session handle is gone
                        None => debug!(contender = %self.identity, "session handles dropped, relinquishing"),
                    }
                    pending.push_back(LeadershipEvent::Relinquish);
                }
                Some(input) = events.recv() => {
                    match self.accept(input) {
                        Some(event) => pending.push_back(event),
                        None => continue,
                    }
                }
            }

            self.drain(&mut pending).await;
            if let Some(done) = reply {
                let _ = done.send(());
            }
        }

        forwarder.abort();
        info!(contender = %self.identity, path = %self.election_path, "left the election");
    }

    fn accept(&self, input: Input) -> Option<LeadershipEvent> {
        match input {
            Input::Connection(state) => {
                info!(contender = %self.identity, "{} to {}", state, self.election_path);
                Some(LeadershipEvent::Connection(state))
            }
            Input::WatchFired { generation, .. } if generation != self.generation => {
                debug!(generation, current = self.generation, "ignoring a replaced watch");
                None
            }
            Input::WatchFired {
                outcome: WatchOutcome::Deleted,
                ..
            } => {
                info!(contender = %self.identity, "processing deletion of the predecessor node");
                Some(LeadershipEvent::PredecessorGone)
            }
            Input::WatchFired {
                outcome: WatchOutcome::Invalidated,
                ..
            } => {
                // the session went away; the reconnect path re-arms the watch
                debug!(contender = %self.identity, "predecessor watch invalidated");
                None
            }
        }
    }

    async fn drain(&mut self, pending: &mut VecDeque<LeadershipEvent>) {
        while let Some(event) = pending.pop_front() {
            if self.closed {
                pending.clear();
                break;
            }

            let Transition { next, effects } = transition(self.state, event);
            debug!(
                contender = %self.identity,
                from = %self.state,
                event = ?event,
                to = %next,
                "leadership transition"
            );
            self.state = next;

            let mut publish = true;
            for effect in effects {
                match self.apply(effect).await {
                    Applied::Done => {}
                    Applied::Follow(follow) => pending.push_back(follow),
                    Applied::Abort(follow) => {
                        publish = false;
                        pending.push_front(follow);
                        break;
                    }
                }
            }

            if publish {
                self.publish(next);
            }
        }
    }

    fn publish(&self, next: LeadershipState) {
        let changed = self.published.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if !changed {
            return;
        }

        leadership_metrics::record_state(&self.identity, next);
        info!(contender = %self.identity, state = %next, "leadership state changed");
    }

    async fn apply(&mut self, effect: Effect) -> Applied {
        match effect {
            Effect::StartDuties => self.start_duties().await,
            Effect::StopDuties => {
                self.callbacks.on_leadership_suspended().await;
                info!(
                    contender = %self.identity,
                    "current node no longer the {} leader", self.election_path
                );
                Applied::Done
            }
            Effect::InstallWatch => Applied::Follow(self.install_watch(true).await),
            Effect::Reregister => match self.ensure_registered().await {
                Ok(()) => Applied::Follow(self.install_watch(false).await),
                Err(err) => {
                    error!(contender = %self.identity, error = %err, "could not re-register the contender node");
                    Applied::Follow(LeadershipEvent::EvaluationFailed)
                }
            },
            Effect::Requeue => match self.requeue().await {
                Ok(()) => {
                    self.schedule_reevaluation();
                    Applied::Done
                }
                Err(err) => {
                    error!(contender = %self.identity, error = %err, "could not requeue the contender node");
                    Applied::Follow(LeadershipEvent::EvaluationFailed)
                }
            },
            Effect::Close => {
                self.close().await;
                Applied::Done
            }
        }
    }

    async fn start_duties(&mut self) -> Applied {
        info!(contender = %self.identity, "taking the {} leadership", self.election_path);
        match self.callbacks.on_leadership_taken().await {
            Ok(()) => Applied::Done,
            Err(err) => {
                error!(contender = %self.identity, error = %err, "duties failed to start");
                leadership_metrics::record_duty_failure(&self.identity);
                let _ = self.failures.send(LeadershipError::DutyStart(err));
                Applied::Abort(LeadershipEvent::DutiesFailed)
            }
        }
    }

    // `vanish_on_missing` distinguishes a plain re-evaluation, where a missing node
    // triggers re-registration, from one that just re-registered.
    async fn install_watch(&mut self, vanish_on_missing: bool) -> LeadershipEvent {
        self.cancel_watch();
        self.generation += 1;

        match self.self_watch.install_watch(&self.own).await {
            Ok(Standing::Lowest) => LeadershipEvent::Granted,
            Ok(Standing::Behind { predecessor, watch }) => {
                debug!(
                    contender = %self.identity,
                    predecessor = %predecessor.name,
                    generation = self.generation,
                    "waiting for the predecessor"
                );
                let inputs = self.inputs.clone();
                let generation = self.generation;
                self.watch_task = Some(tokio::spawn(async move {
                    let outcome = watch.deleted().await;
                    let _ = inputs.send(Input::WatchFired {
                        generation,
                        outcome,
                    });
                }));
                LeadershipEvent::Behind
            }
            Err(LeadershipError::NodeMissing(_)) if vanish_on_missing => LeadershipEvent::NodeVanished,
            Err(_) => LeadershipEvent::EvaluationFailed,
        }
    }

    // Contend again after one retry interval, as if the predecessor had been deleted.
    fn schedule_reevaluation(&mut self) {
        self.cancel_watch();
        self.generation += 1;

        let inputs = self.inputs.clone();
        let generation = self.generation;
        let delay = self.retry.sleep_between();
        self.watch_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inputs.send(Input::WatchFired {
                generation,
                outcome: WatchOutcome::Deleted,
            });
        }));
    }

    fn cancel_watch(&mut self) {
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
    }

    async fn ensure_registered(&mut self) -> Result<()> {
        let client = &self.client;
        let path = self.election_path.as_str();
        let children = self
            .retry
            .run("list_children", move || client.list_children(path))
            .await?;

        if children.iter().any(|name| *name == self.own.name) {
            return Ok(());
        }
        self.register().await
    }

    async fn requeue(&mut self) -> Result<()> {
        self.cancel_watch();
        self.delete_own_node().await;
        self.register().await
    }

    async fn register(&mut self) -> Result<()> {
        let client = &self.client;
        let path = self.election_path.as_str();
        let identity = self.identity.as_str();
        let name = self
            .retry
            .run("create_ephemeral_sequential", move || {
                client.create_ephemeral_sequential(path, identity)
            })
            .await?;

        self.own = ContenderNode::parse(&name).ok_or(LeadershipError::NodeMissing(name))?;
        info!(contender = %self.identity, node = %self.own.name, "registered contender node");
        Ok(())
    }

    async fn delete_own_node(&self) {
        let client = &self.client;
        let node_path = join_path(&[&self.election_path, &self.own.name]);
        let target = node_path.as_str();
        if let Err(err) = self
            .retry
            .run("delete", move || client.delete(target))
            .await
        {
            warn!(contender = %self.identity, node = %node_path, error = %err, "could not delete the contender node");
        }
    }

    async fn close(&mut self) {
        self.cancel_watch();
        self.delete_own_node().await;
        if let Err(err) = self.client.close().await {
            warn!(contender = %self.identity, error = %err, "could not close the coordination session");
        }
        self.closed = true;
    }
}
