pub mod clock;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod lookup;
pub mod models;
pub mod rate_limiter;
pub mod remote;
pub mod sequencer;
pub mod store;
pub mod tracing_setup;

// Re-export the types a presentation layer needs at crate root for convenience
pub use config::{CoreConfig, Preset, Settings, SettingsStore};
pub use credentials::{CookieCredentials, CredentialAccessor};
pub use engine::{CommitOutcome, CommitTally, Engine, ManagementSession, SessionState};
pub use error::{RemoteError, SessionError};
pub use events::{CoreEvent, PageEvent};
pub use models::{Container, ContainerId, MutationKind, Subject, Visibility};
pub use rate_limiter::RateLimitStatus;
pub use remote::{GraphqlRemote, InMemoryRemote, RemoteService};
pub use store::SnapshotOrigin;
