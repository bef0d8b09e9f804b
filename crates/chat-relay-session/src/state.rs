//! Forward-only session state.

use chat_relay_core::SessionState;
use tokio::sync::watch;
use tracing::info;

use crate::error::AdapterError;

/// Owner of the adapter's [`SessionState`].
///
/// Readers get a `watch` receiver; only the owner moves the state, and
/// only along [`SessionState::can_transition_to`].
#[derive(Debug)]
pub struct SessionStateCell {
    tx: watch::Sender<SessionState>,
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateCell {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Initializing);
        Self { tx }
    }

    #[must_use]
    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// Returns `InvalidTransition` if `next` would move the session backward.
    pub fn transition(&self, next: SessionState) -> Result<(), AdapterError> {
        let from = self.get();
        if !from.can_transition_to(next) {
            return Err(AdapterError::InvalidTransition { from, to: next });
        }
        self.tx.send_replace(next);
        info!(%from, to = %next, "session state changed");
        Ok(())
    }

    /// Wind the session down after an unexpected error: `Failed` where
    /// that is still reachable, then `Closed`.
    pub fn fail_and_close(&self) {
        if self.get().can_transition_to(SessionState::Failed) {
            let _ = self.transition(SessionState::Failed);
        }
        if self.get().can_transition_to(SessionState::Closed) {
            let _ = self.transition(SessionState::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use SessionState::*;

    #[test]
    fn test_transition_publishes_to_watchers() {
        let cell = SessionStateCell::new();
        let rx = cell.subscribe();

        cell.transition(AwaitingLoginSubmission).unwrap();
        cell.transition(AwaitingLoginResult).unwrap();

        assert_eq!(*rx.borrow(), AwaitingLoginResult);
        assert_eq!(cell.get(), AwaitingLoginResult);
    }

    #[test]
    fn test_authenticated_never_regresses() {
        let cell = SessionStateCell::new();
        cell.transition(AwaitingLoginSubmission).unwrap();
        cell.transition(AwaitingLoginResult).unwrap();
        cell.transition(Authenticated).unwrap();

        let err = cell.transition(AwaitingLoginSubmission).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::InvalidTransition {
                from: Authenticated,
                to: AwaitingLoginSubmission
            }
        ));
        assert_eq!(cell.get(), Authenticated);
    }

    #[test]
    fn test_fail_and_close_from_pending_state() {
        let cell = SessionStateCell::new();
        cell.transition(AwaitingLoginSubmission).unwrap();

        cell.fail_and_close();

        assert_eq!(cell.get(), Closed);
    }

    #[test]
    fn test_fail_and_close_after_authentication_skips_failed() {
        let cell = SessionStateCell::new();
        cell.transition(Authenticated).unwrap();
        let rx = cell.subscribe();

        cell.fail_and_close();

        assert_eq!(cell.get(), Closed);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_closed_is_absorbing() {
        let cell = SessionStateCell::new();
        cell.transition(Failed).unwrap();
        cell.transition(Closed).unwrap();

        cell.fail_and_close();

        assert!(cell.transition(Initializing).is_err());
        assert_eq!(cell.get(), Closed);
    }
}
