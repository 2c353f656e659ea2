mod errors;
pub use errors::{CoordinationError, Result};

mod client;
pub use client::{ConnectionSettings, Connector, CoordinationClient};

mod connection;
pub use connection::{ConnectionState, ConnectionStateStream};

mod watch;
pub use watch::{DeletionWatch, WatchOutcome, WatchRegistration};

mod node;
pub use node::{join_path, node_name, parse_sequence, LOCK_MARKER};

mod retry;
pub use retry::RetryPolicy;

mod memory_store;
pub use memory_store::{MemoryCoordinator, MEMORY_SCHEME};
