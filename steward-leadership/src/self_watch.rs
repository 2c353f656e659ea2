use std::sync::Arc;
use std::time::Duration;
use steward_core::coordination::{
    join_path, parse_sequence, CoordinationClient, DeletionWatch, WatchRegistration,
};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::errors::{LeadershipError, Result};
use crate::leadership_metrics;

/// A contender's node under the election path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContenderNode {
    pub name: String,
    pub sequence: u64,
}

impl ContenderNode {
    /// `None` when the name carries no `lock-<n>` suffix.
    pub fn parse(name: &str) -> Option<Self> {
        parse_sequence(name).map(|sequence| ContenderNode {
            name: name.to_owned(),
            sequence,
        })
    }
}

/// Where this contender stands in the race.
#[derive(Debug)]
pub enum Standing {
    /// No live node has a lower sequence number.
    Lowest,
    /// The predecessor exists and `watch` fires when it is deleted.
    Behind {
        predecessor: ContenderNode,
        watch: DeletionWatch,
    },
}

/// Contenders sorted by descending sequence number. Names without a sequence are skipped.
pub fn order_contenders(names: &[String]) -> Vec<ContenderNode> {
    let mut nodes: Vec<ContenderNode> = names
        .iter()
        .filter_map(|name| {
            let node = ContenderNode::parse(name);
            if node.is_none() {
                debug!(node = %name, "ignoring node without a sequence suffix");
            }
            node
        })
        .collect();
    nodes.sort_by(|a, b| b.sequence.cmp(&a.sequence));
    nodes
}

/// The node immediately below `own_sequence`, given contenders in descending order.
pub fn predecessor_of(ordered: &[ContenderNode], own_sequence: u64) -> Option<&ContenderNode> {
    ordered.iter().find(|node| node.sequence < own_sequence)
}

/// The lowest contender, i.e. the one the service ordering makes leader.
pub fn lowest(ordered: &[ContenderNode]) -> Option<&ContenderNode> {
    ordered.last()
}

enum Evaluation {
    Settled(Standing),
    // the predecessor disappeared between listing and watching
    Raced(ContenderNode),
}

/// Keeps a single deletion watch on this contender's predecessor.
#[derive(Clone)]
pub struct SelfWatch {
    client: Arc<dyn CoordinationClient>,
    contender: String,
    election_path: String,
    max_retries: usize,
    retry_interval: Duration,
}

impl std::fmt::Debug for SelfWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfWatch")
            .field("client", &self.client.client_id())
            .field("contender", &self.contender)
            .field("election_path", &self.election_path)
            .field("max_retries", &self.max_retries)
            .field("retry_interval", &self.retry_interval)
            .finish()
    }
}

impl SelfWatch {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        contender: &str,
        election_path: &str,
        max_retries: usize,
        retry_interval: Duration,
    ) -> Self {
        Self {
            client,
            contender: contender.to_owned(),
            election_path: election_path.to_owned(),
            max_retries,
            retry_interval,
        }
    }

    /// List the contenders, find `own`'s predecessor and arm a deletion watch on it.
    ///
    /// Transient failures, including our own node not yet being visible, are retried
    /// up to `max_retries` times with `retry_interval` between attempts. A predecessor
    /// that vanishes before the watch is armed triggers an immediate re-evaluation.
    pub async fn install_watch(&self, own: &ContenderNode) -> Result<Standing> {
        let mut attempt = 0;
        loop {
            match self.evaluate(own).await {
                Ok(Evaluation::Settled(standing)) => return Ok(standing),
                Ok(Evaluation::Raced(predecessor)) => {
                    debug!(
                        node = %own.name,
                        predecessor = %predecessor.name,
                        "predecessor deleted before the watch was armed, re-evaluating"
                    );
                }
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        node = %own.name,
                        attempt,
                        error = %err,
                        "could not install the predecessor watch, retrying"
                    );
                    sleep(self.retry_interval).await;
                }
                Err(err) => {
                    error!(node = %own.name, error = %err, "could not install the predecessor watch");
                    return Err(err);
                }
            }
        }
    }

    async fn evaluate(&self, own: &ContenderNode) -> Result<Evaluation> {
        let children = self.client.list_children(&self.election_path).await?;
        let ordered = order_contenders(&children);

        if !ordered.iter().any(|node| node.name == own.name) {
            return Err(LeadershipError::NodeMissing(own.name.clone()));
        }

        let Some(predecessor) = predecessor_of(&ordered, own.sequence) else {
            return Ok(Evaluation::Settled(Standing::Lowest));
        };

        let path = join_path(&[&self.election_path, &predecessor.name]);
        match self.client.watch_for_deletion(&path).await? {
            WatchRegistration::Installed(watch) => {
                leadership_metrics::record_watch_install(&self.contender);
                info!(node = %own.name, path = %path, "starting watcher for predecessor");
                Ok(Evaluation::Settled(Standing::Behind {
                    predecessor: predecessor.clone(),
                    watch,
                }))
            }
            WatchRegistration::NodeAbsent => Ok(Evaluation::Raced(predecessor.clone())),
        }
    }
}
