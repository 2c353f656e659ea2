//! Leader election and leadership lifecycle for Steward.
//!
//! Each process instance registers an ephemeral sequential node under an election
//! path and watches only its immediate predecessor. The instance holding the lowest
//! sequence leads. Leadership changes are driven by a pure state machine and applied
//! by one serialized controller task, so duty callbacks never overlap and duties are
//! stopped as soon as the coordination connection is suspended.
//!
//! Embedding applications implement [`DutyCallbacks`] and drive participation through
//! a [`LifecycleDriver`]. Without a configured coordination address the driver skips
//! the election and the instance simply leads.

mod config;
mod controller;
mod duties;
mod errors;
mod health;
pub mod leadership_metrics;
mod lifecycle;
mod self_watch;
mod session;
mod state_machine;

pub use config::{
    local_identity, CoordinationNode, DutyFailurePolicy, ElectionConfig, ElectionNode,
    LoadConfiguration, DEFAULT_ELECTION_PATH,
};
pub use duties::DutyCallbacks;
pub use errors::{DutyError, LeadershipError, Result};
pub use health::{DeploymentMode, HealthReport, LeadershipProbe};
pub use lifecycle::LifecycleDriver;
pub use self_watch::{lowest, order_contenders, predecessor_of, ContenderNode, SelfWatch, Standing};
pub use session::{LeadershipSession, SessionHandle, SessionOptions};
pub use state_machine::{transition, Effect, LeadershipEvent, LeadershipState, Transition};
