//! Session lifecycle for the chat relay.
//!
//! Provides:
//! - `ChatAdapter` - Entry point: login, then keep relaying messages
//! - `SessionStateCell` - Forward-only session state
//! - `SyncOrchestrator` - Single-flight discovery passes driven by network activity

pub mod adapter;
pub mod error;
pub mod login;
pub mod orchestrator;
pub mod state;

pub use adapter::ChatAdapter;
pub use error::{AdapterError, LoginFailure};
pub use login::LoginOutcome;
pub use orchestrator::{SyncOrchestrator, TriggerOutcome};
pub use state::SessionStateCell;
