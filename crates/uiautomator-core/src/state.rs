use crate::error::LifecycleError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the managed runner process
///
/// `Stopped -> Starting -> Online -> Stopping -> Stopped`, and again from the
/// top on the next `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Online,
    Stopping,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Online => "online",
            LifecycleState::Stopping => "stopping",
        }
    }

    /// An exit observed in this state was requested by `shutdown`
    pub fn expects_exit(&self) -> bool {
        matches!(self, LifecycleState::Stopping)
    }

    /// An exit observed in this state was not requested by anyone
    pub fn is_unexpected_exit(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Online)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications published by the lifecycle manager
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Sent once per transition, carrying the new state
    StateChanged { state: LifecycleState },
    /// Sent when `start` fails, before the failure is returned
    Error(LifecycleError),
}

impl LifecycleEvent {
    pub fn state(&self) -> Option<LifecycleState> {
        match self {
            LifecycleEvent::StateChanged { state } => Some(*state),
            LifecycleEvent::Error(_) => None,
        }
    }
}
