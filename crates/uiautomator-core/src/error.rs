use thiserror::Error;

/// Error types surfaced by the lifecycle manager
///
/// Variants carry rendered messages rather than sources so the error can be
/// cloned onto the event channel and returned to the caller at the same time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Construction error: {0}")]
    Construction(String),

    #[error("Unable to parse archive name from {path}")]
    Parse { path: String },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Spawn error: {0}")]
    Spawn(String),

    #[error("Kill error: {0}")]
    Kill(String),

    #[error("Stop error: {0}")]
    Stop(String),

    #[error("Runner process is already started")]
    AlreadyStarted,

    #[error("Runner process is still starting")]
    StartInProgress,
}

impl LifecycleError {
    pub fn construction_error(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }

    pub fn parse_error(path: impl Into<String>) -> Self {
        Self::Parse { path: path.into() }
    }

    pub fn transfer_error(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn spawn_error(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    pub fn kill_error(msg: impl Into<String>) -> Self {
        Self::Kill(msg.into())
    }

    pub fn stop_error(msg: impl Into<String>) -> Self {
        Self::Stop(msg.into())
    }

    /// Check if this error is returned to the caller of `start`
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            LifecycleError::Parse { .. }
                | LifecycleError::Transfer(_)
                | LifecycleError::Spawn(_)
                | LifecycleError::AlreadyStarted
                | LifecycleError::StartInProgress
        )
    }

    /// Check if this error only ever ends up in the log
    pub fn is_best_effort(&self) -> bool {
        matches!(self, LifecycleError::Kill(_))
    }
}
