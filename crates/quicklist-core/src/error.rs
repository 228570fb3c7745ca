use std::time::Duration;

/// Outcome classes of a single remote call.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("No anti-forgery token available; please sign in again")]
    MissingToken,

    #[error("Signed-in viewer is unknown; please sign in again")]
    MissingViewer,

    #[error("Not authorized (HTTP {status}); please sign in again")]
    Unauthorized { status: u16 },

    #[error("Not found")]
    NotFound,

    #[error("Subject is already a member of this list")]
    AlreadyMember,

    #[error("Subject is not a member of this list")]
    NotMember,

    #[error("Remote returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Remote rejected the request: {0}")]
    Api(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Request queue is shut down")]
    SequencerClosed,

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
}

impl RemoteError {
    /// Credential problems; never retried automatically.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::MissingToken | Self::MissingViewer | Self::Unauthorized { .. }
        )
    }

    /// The remote reports the mutation as a no-op: the desired end state
    /// already holds.
    pub fn is_already_in_desired_state(&self) -> bool {
        matches!(self, Self::AlreadyMember | Self::NotMember)
    }
}

/// Failures that prevent a management session from opening at all.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No anti-forgery token available; please sign in again")]
    MissingToken,

    #[error("Could not resolve @{0}")]
    SubjectNotFound(String),

    #[error("Failed to load lists: {0}")]
    Containers(#[source] RemoteError),
}
