use async_trait::async_trait;

use crate::errors::DutyError;

/// The privileged duties an embedding application runs while it holds leadership.
///
/// The controller serializes every call: `on_leadership_taken` and
/// `on_leadership_suspended` never overlap and always alternate.
#[async_trait]
pub trait DutyCallbacks: Send + Sync + 'static {
    /// Called once when the lifecycle driver starts, before any leadership callback.
    async fn initialize(&self) {}

    /// Start the duties. A failure aborts this transition only: the contender is
    /// not advertised as leader and its place in the race is requeued.
    async fn on_leadership_taken(&self) -> Result<(), DutyError>;

    /// Stop the duties. Best-effort; must not fail.
    async fn on_leadership_suspended(&self);

    /// Release resources when the lifecycle driver stops, after duties-stop ran.
    ///
    /// A single instance always gets this call on stop; in an election only the
    /// contender leading at stop time does.
    async fn on_shutdown(&self) {}
}
