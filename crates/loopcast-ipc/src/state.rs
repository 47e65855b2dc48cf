//! Session state machine types.

use serde::{Deserialize, Serialize};

/// The state of one streaming session.
///
/// `Idle → Starting → Active → {Completed | Failed}`. `Starting` may also
/// fail directly when the engine never produced any output. Terminal states
/// are final; retrying means starting a new session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session has been requested.
    #[default]
    Idle,

    /// The media engine is being launched.
    Starting,

    /// The media engine has reported at least one event.
    Active,

    /// The session ended normally.
    Completed {
        /// Why the session ended.
        reason: StopReason,
    },

    /// The media engine could not be launched or exited unsuccessfully.
    Failed {
        /// Engine exit code, if the process ran and reported one.
        exit_code: Option<i32>,

        /// Error message.
        message: String,
    },
}

impl SessionState {
    /// Returns true if no session has been requested.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the engine is being launched.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting)
    }

    /// Returns true if the engine is running.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true while a session occupies the engine (starting or active).
    pub fn is_in_flight(&self) -> bool {
        self.is_starting() || self.is_active()
    }

    /// Returns true if the session has ended, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Returns true if the session failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        match (self, next) {
            (Self::Idle, Self::Starting) => true,
            (Self::Starting, Self::Active) => true,
            (Self::Starting, Self::Completed { .. } | Self::Failed { .. }) => true,
            (Self::Active, Self::Completed { .. } | Self::Failed { .. }) => true,
            _ => false,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting => "Starting",
            Self::Active => "Active",
            Self::Completed { .. } => "Completed",
            Self::Failed { .. } => "Failed",
        }
    }

    /// Returns the one-line status readout for this state.
    pub fn status_message(&self) -> String {
        match self {
            Self::Idle => "Status: Ready".to_string(),
            Self::Starting => "Status: Starting engine...".to_string(),
            Self::Active => "Streaming...".to_string(),
            Self::Completed { reason } => format!("Stream finished ({})", reason.message()),
            Self::Failed { .. } => "Stream failed/stopped. Check the stream key.".to_string(),
        }
    }
}

/// Reason a session completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The media engine exited with a success code.
    EngineFinished,

    /// The user asked for the session to stop.
    UserRequested,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> &'static str {
        match self {
            Self::EngineFinished => "engine exited",
            Self::UserRequested => "stopped by user",
        }
    }
}
