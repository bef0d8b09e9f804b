//! Session error types.

use chat_relay_core::{HandlerError, SessionState, SurfaceError};
use chat_relay_sync::SyncError;
use thiserror::Error;

/// Why a login attempt ended without a session.
///
/// The `Display` text is the `loginFailed` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoginFailure {
    #[error("Username and/or password are incorrect")]
    InvalidCredentials,
    #[error("There is already an opened app. Close that one, and execute the command again.")]
    DuplicateSession,
    #[error("Unexpected scenario after trying to login")]
    UnexpectedOutcome,
    #[error("Timed out waiting for the verification code to be confirmed")]
    VerificationTimeout,
}

/// Adapter error.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),
    #[error("Sync pass failed: {0}")]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },
    #[error("Adapter already started")]
    AlreadyStarted,
}
