use tokio::sync::oneshot;

/// Result of asking the coordination service to watch a node for deletion.
#[derive(Debug)]
pub enum WatchRegistration {
    /// The node exists and the watch is armed.
    Installed(DeletionWatch),
    /// The node was already gone when the watch was requested; nothing will fire.
    NodeAbsent,
}

/// How a [`DeletionWatch`] completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The watched node was deleted.
    Deleted,
    /// The session that owned the watch went away; the watch will never fire.
    Invalidated,
}

/// One-shot notification of a node deletion.
#[derive(Debug)]
pub struct DeletionWatch {
    path: String,
    rx: oneshot::Receiver<()>,
}

impl DeletionWatch {
    pub fn new(path: impl Into<String>, rx: oneshot::Receiver<()>) -> Self {
        Self {
            path: path.into(),
            rx,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait until the watch fires. Consumes the watch: it fires at most once.
    pub async fn deleted(self) -> WatchOutcome {
        match self.rx.await {
            Ok(()) => WatchOutcome::Deleted,
            Err(_) => WatchOutcome::Invalidated,
        }
    }
}
