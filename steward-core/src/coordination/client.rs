use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::connection::ConnectionStateStream;
use super::errors::Result;
use super::watch::WatchRegistration;

/// Connection parameters handed to a [`Connector`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Coordination service address, e.g. `memory://cluster-a`.
    pub address: String,
    /// Upper bound for establishing the initial connection.
    pub connection_timeout: Duration,
    /// How long a disconnected session survives before the service expires it.
    pub session_timeout: Duration,
}

/// Client to a strongly-consistent coordination service.
///
/// Implementations are assumed linearizable. Paths are absolute and `/` separated;
/// node names returned by [`create_ephemeral_sequential`](Self::create_ephemeral_sequential)
/// and [`list_children`](Self::list_children) are relative to their parent.
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// Stable identifier of this client, used as the prefix of the nodes it creates.
    fn client_id(&self) -> &str;

    /// Create an ephemeral node under `path` with a service-assigned sequence suffix.
    /// `id` is stored as the node data. Returns the node name.
    async fn create_ephemeral_sequential(&self, path: &str, id: &str) -> Result<String>;

    /// Children of `path`, in no particular order.
    async fn list_children(&self, path: &str) -> Result<Vec<String>>;

    /// Data stored in the node, `None` if it does not exist.
    async fn get_data(&self, node_path: &str) -> Result<Option<String>>;

    /// Delete a node. Deleting a missing node is not an error.
    async fn delete(&self, node_path: &str) -> Result<()>;

    /// Install a one-shot watch that fires when `node_path` is deleted.
    async fn watch_for_deletion(&self, node_path: &str) -> Result<WatchRegistration>;

    /// Subscribe to the connection lifecycle of this client.
    fn connection_states(&self) -> ConnectionStateStream;

    /// Close the session. Ephemeral nodes owned by it are removed.
    async fn close(&self) -> Result<()>;
}

/// Builds connected [`CoordinationClient`]s from [`ConnectionSettings`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn CoordinationClient>>;
}
