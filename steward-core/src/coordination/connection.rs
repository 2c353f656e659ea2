use futures::stream::Stream;
use futures::StreamExt;
use std::task::{Context, Poll};
use std::{fmt, pin::Pin};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::errors::{CoordinationError, Result};

/// Lifecycle of a coordination-service connection.
///
/// `Suspended` means the connection dropped but the session may still be alive;
/// `Lost` means the session expired and every ephemeral node it owned is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connected,
    Suspended,
    Reconnected,
    Lost,
}

impl ConnectionState {
    /// Whether operations can be issued in this state.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Suspended => "SUSPENDED",
            ConnectionState::Reconnected => "RECONNECTED",
            ConnectionState::Lost => "LOST",
        };
        f.write_str(name)
    }
}

pub struct ConnectionStateStream {
    inner: Pin<Box<dyn Stream<Item = Result<ConnectionState>> + Send>>,
}

impl Stream for ConnectionStateStream {
    type Item = Result<ConnectionState>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl ConnectionStateStream {
    pub fn new(stream: impl Stream<Item = Result<ConnectionState>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Create a stream from a `tokio::sync::broadcast::Receiver`.
    /// Lag is surfaced as `CoordinationError::WatchError`; the consumer should resync.
    pub fn from_broadcast(rx: broadcast::Receiver<ConnectionState>) -> Self {
        let stream = BroadcastStream::new(rx).filter_map(|result| {
            futures::future::ready(match result {
                Ok(state) => Some(Ok(state)),
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                    Some(Err(CoordinationError::WatchError(format!(
                        "connection state stream lagged by {} events",
                        n
                    ))))
                }
            })
        });
        Self {
            inner: Box::pin(stream),
        }
    }
}
