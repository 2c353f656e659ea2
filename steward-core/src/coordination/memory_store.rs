use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};

use super::{
    client::{ConnectionSettings, Connector, CoordinationClient},
    connection::{ConnectionState, ConnectionStateStream},
    errors::{CoordinationError, Result},
    node::node_name,
    watch::{DeletionWatch, WatchRegistration},
};

/// Address scheme served by [`MemoryCoordinator`].
pub const MEMORY_SCHEME: &str = "memory://";

/// MemoryCoordinator is an in-process coordination service.
///
/// It keeps ephemeral sequential nodes per parent path, one-shot deletion watches and
/// a connection lifecycle per client. Faults are injected with [`suspend`](Self::suspend),
/// [`reconnect`](Self::reconnect) and [`expire`](Self::expire).
/// SHOULD BE USED ONLY FOR TESTING AND LOCAL DEMOS
#[derive(Debug, Clone)]
pub struct MemoryCoordinator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tree: DashMap<String, ParentNode>,
    clients: DashMap<String, ClientRecord>,
    next_client: AtomicU64,
    reachable: AtomicBool,
    operations: AtomicU64,
    watches_installed: AtomicU64,
    watches_fired: AtomicU64,
}

#[derive(Debug, Default)]
struct ParentNode {
    // never reset, so sequence numbers are not reused for the lifetime of the path
    next_seq: u64,
    children: BTreeMap<String, NodeRecord>,
    watches: HashMap<String, Vec<WatchEntry>>,
}

#[derive(Debug)]
struct NodeRecord {
    owner: String,
    data: String,
}

#[derive(Debug)]
struct WatchEntry {
    owner: String,
    tx: oneshot::Sender<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Connected,
    Suspended,
    Expired,
    Closed,
}

#[derive(Debug)]
struct ClientRecord {
    link: Link,
    epoch: u64,
    session_timeout: Duration,
    events: broadcast::Sender<ConnectionState>,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        MemoryCoordinator {
            inner: Arc::new(Inner {
                tree: DashMap::new(),
                clients: DashMap::new(),
                next_client: AtomicU64::new(1),
                reachable: AtomicBool::new(true),
                operations: AtomicU64::new(0),
                watches_installed: AtomicU64::new(0),
                watches_fired: AtomicU64::new(0),
            }),
        }
    }

    /// Make new connections fail with `Unreachable` (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of client calls served, connection attempts included.
    pub fn operation_count(&self) -> u64 {
        self.inner.operations.load(Ordering::SeqCst)
    }

    pub fn watches_installed(&self) -> u64 {
        self.inner.watches_installed.load(Ordering::SeqCst)
    }

    /// Watches that fired and reached a live receiver.
    pub fn watches_fired(&self) -> u64 {
        self.inner.watches_fired.load(Ordering::SeqCst)
    }

    /// Children of `path`, sorted by name. Does not count as an operation.
    pub fn children(&self, path: &str) -> Vec<String> {
        self.inner
            .tree
            .get(path)
            .map(|parent| parent.children.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Identifiers of every client that ever connected.
    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .clients
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Delete a node out of band, as an operator would.
    pub fn delete_node(&self, node_path: &str) -> Result<()> {
        let (parent, name) = split_node_path(node_path)?;
        self.remove_node(parent, name);
        Ok(())
    }

    /// Drop the client's connection. Its session survives for the session timeout,
    /// after which it expires unless [`reconnect`](Self::reconnect) is called.
    pub fn suspend(&self, client_id: &str) {
        let (epoch, timeout) = {
            let Some(mut record) = self.inner.clients.get_mut(client_id) else {
                return;
            };
            if record.link != Link::Connected {
                return;
            }
            record.link = Link::Suspended;
            record.epoch += 1;
            let _ = record.events.send(ConnectionState::Suspended);
            (record.epoch, record.session_timeout)
        };
        info!(client = %client_id, "coordination client suspended");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let coordinator = self.clone();
            let client_id = client_id.to_owned();
            handle.spawn(async move {
                tokio::time::sleep(timeout).await;
                coordinator.expire_if_stale(&client_id, epoch);
            });
        }
    }

    /// Restore the client's connection after a suspension or an expiry.
    pub fn reconnect(&self, client_id: &str) {
        let Some(mut record) = self.inner.clients.get_mut(client_id) else {
            return;
        };
        if !matches!(record.link, Link::Suspended | Link::Expired) {
            return;
        }
        record.link = Link::Connected;
        record.epoch += 1;
        let _ = record.events.send(ConnectionState::Reconnected);
        info!(client = %client_id, "coordination client reconnected");
    }

    /// Expire the client's session: its ephemeral nodes are deleted and its watches
    /// invalidated. A connected client observes `Suspended` first, then `Lost`.
    pub fn expire(&self, client_id: &str) {
        {
            let Some(mut record) = self.inner.clients.get_mut(client_id) else {
                return;
            };
            match record.link {
                Link::Expired | Link::Closed => return,
                Link::Connected => {
                    let _ = record.events.send(ConnectionState::Suspended);
                }
                Link::Suspended => {}
            }
            record.link = Link::Expired;
            record.epoch += 1;
        }

        self.purge_client(client_id);

        if let Some(record) = self.inner.clients.get(client_id) {
            let _ = record.events.send(ConnectionState::Lost);
        }
        info!(client = %client_id, "coordination session expired");
    }

    fn expire_if_stale(&self, client_id: &str, epoch: u64) {
        let stale = self
            .inner
            .clients
            .get(client_id)
            .map(|record| record.link == Link::Suspended && record.epoch == epoch)
            .unwrap_or(false);
        if stale {
            self.expire(client_id);
        }
    }

    fn count_operation(&self) {
        self.inner.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn check_link(&self, client_id: &str) -> Result<()> {
        match self.inner.clients.get(client_id).map(|record| record.link) {
            Some(Link::Connected) => Ok(()),
            Some(Link::Suspended) | Some(Link::Expired) => Err(CoordinationError::ConnectionLoss(
                format!("client {} is disconnected", client_id),
            )),
            Some(Link::Closed) | None => Err(CoordinationError::SessionClosed),
        }
    }

    // Remove a node and fire every watch registered on it.
    fn remove_node(&self, parent: &str, name: &str) -> bool {
        let Some(mut node) = self.inner.tree.get_mut(parent) else {
            return false;
        };
        if node.children.remove(name).is_none() {
            return false;
        }
        if let Some(watchers) = node.watches.remove(name) {
            for watcher in watchers {
                if watcher.tx.send(()).is_ok() {
                    self.inner.watches_fired.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        debug!(parent = %parent, node = %name, "node deleted");
        true
    }

    // Delete every ephemeral node the client owns and drop the watches it registered.
    fn purge_client(&self, client_id: &str) {
        let parents: Vec<String> = self
            .inner
            .tree
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for parent in parents {
            let owned: Vec<String> = match self.inner.tree.get_mut(&parent) {
                Some(mut node) => {
                    for watchers in node.watches.values_mut() {
                        watchers.retain(|w| w.owner != client_id);
                    }
                    node.children
                        .iter()
                        .filter(|(_, record)| record.owner == client_id)
                        .map(|(name, _)| name.clone())
                        .collect()
                }
                None => continue,
            };
            for name in owned {
                self.remove_node(&parent, &name);
            }
        }
    }
}

#[async_trait]
impl Connector for MemoryCoordinator {
    async fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn CoordinationClient>> {
        self.count_operation();

        if !settings.address.starts_with(MEMORY_SCHEME) {
            return Err(CoordinationError::UnsupportedBackend(
                settings.address.clone(),
            ));
        }
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unreachable(settings.address.clone()));
        }

        let id = format!(
            "{:08x}",
            self.inner.next_client.fetch_add(1, Ordering::SeqCst)
        );
        let (events, _) = broadcast::channel(64);
        self.inner.clients.insert(
            id.clone(),
            ClientRecord {
                link: Link::Connected,
                epoch: 0,
                session_timeout: settings.session_timeout,
                events,
            },
        );
        info!(client = %id, address = %settings.address, "coordination client connected");

        Ok(Arc::new(MemoryClient {
            id,
            coordinator: self.clone(),
        }))
    }
}

/// A client session against a [`MemoryCoordinator`].
#[derive(Debug)]
pub struct MemoryClient {
    id: String,
    coordinator: MemoryCoordinator,
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    fn client_id(&self) -> &str {
        &self.id
    }

    async fn create_ephemeral_sequential(&self, path: &str, id: &str) -> Result<String> {
        self.coordinator.count_operation();
        self.coordinator.check_link(&self.id)?;
        validate_path(path)?;

        let mut parent = self
            .coordinator
            .inner
            .tree
            .entry(path.to_owned())
            .or_default();
        let seq = parent.next_seq;
        parent.next_seq += 1;

        let name = node_name(&self.id, seq);
        parent.children.insert(
            name.clone(),
            NodeRecord {
                owner: self.id.clone(),
                data: id.to_owned(),
            },
        );
        Ok(name)
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        self.coordinator.count_operation();
        self.coordinator.check_link(&self.id)?;
        validate_path(path)?;

        Ok(self.coordinator.children(path))
    }

    async fn get_data(&self, node_path: &str) -> Result<Option<String>> {
        self.coordinator.count_operation();
        self.coordinator.check_link(&self.id)?;
        let (parent, name) = split_node_path(node_path)?;

        Ok(self
            .coordinator
            .inner
            .tree
            .get(parent)
            .and_then(|node| node.children.get(name).map(|record| record.data.clone())))
    }

    async fn delete(&self, node_path: &str) -> Result<()> {
        self.coordinator.count_operation();
        self.coordinator.check_link(&self.id)?;
        let (parent, name) = split_node_path(node_path)?;

        self.coordinator.remove_node(parent, name);
        Ok(())
    }

    async fn watch_for_deletion(&self, node_path: &str) -> Result<WatchRegistration> {
        self.coordinator.count_operation();
        self.coordinator.check_link(&self.id)?;
        let (parent, name) = split_node_path(node_path)?;

        // Existence check and registration happen under the same entry lock as deletion.
        let Some(mut node) = self.coordinator.inner.tree.get_mut(parent) else {
            return Ok(WatchRegistration::NodeAbsent);
        };
        if !node.children.contains_key(name) {
            return Ok(WatchRegistration::NodeAbsent);
        }
        let (tx, rx) = oneshot::channel();
        node.watches
            .entry(name.to_owned())
            .or_default()
            .push(WatchEntry {
                owner: self.id.clone(),
                tx,
            });
        self.coordinator
            .inner
            .watches_installed
            .fetch_add(1, Ordering::SeqCst);

        Ok(WatchRegistration::Installed(DeletionWatch::new(node_path, rx)))
    }

    fn connection_states(&self) -> ConnectionStateStream {
        match self.coordinator.inner.clients.get(&self.id) {
            Some(record) => ConnectionStateStream::from_broadcast(record.events.subscribe()),
            None => {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                ConnectionStateStream::from_broadcast(rx)
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.coordinator.count_operation();
        {
            let Some(mut record) = self.coordinator.inner.clients.get_mut(&self.id) else {
                return Ok(());
            };
            if record.link == Link::Closed {
                return Ok(());
            }
            record.link = Link::Closed;
            record.epoch += 1;
        }
        self.coordinator.purge_client(&self.id);
        info!(client = %self.id, "coordination client closed");
        Ok(())
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
        return Err(CoordinationError::InvalidPath(path.to_owned()));
    }
    Ok(())
}

fn split_node_path(node_path: &str) -> Result<(&str, &str)> {
    validate_path(node_path)?;
    match node_path.rsplit_once('/') {
        Some((parent, name)) if !parent.is_empty() && !name.is_empty() => Ok((parent, name)),
        _ => Err(CoordinationError::InvalidPath(node_path.to_owned())),
    }
}
