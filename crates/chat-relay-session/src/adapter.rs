//! Chat adapter: one account, one page, one event stream.

use std::sync::{
    Arc, Mutex, OnceLock, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use chat_relay_core::{
    AccountCredentials, AdapterConfig, AdapterEvent, AdapterHandle, AdapterId, ConfigError,
    EventBus, HandlerError, PageSurface, SessionState, TrafficPattern,
};
use chat_relay_sync::SyncEngine;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::AdapterError,
    login::{Login, LoginOutcome},
    orchestrator::SyncOrchestrator,
    state::SessionStateCell,
};

/// Logs into the chat application and relays new messages as events.
///
/// Subscribe through [`ChatAdapter::events`] before calling
/// [`ChatAdapter::start`]. Dropping the adapter stops the sync listener
/// and cancels a pass in flight.
pub struct ChatAdapter<S: PageSurface> {
    id: AdapterId,
    surface: Arc<S>,
    config: Arc<AdapterConfig>,
    pattern: TrafficPattern,
    state: SessionStateCell,
    bus: EventBus,
    released: AtomicBool,
    orchestrator: OnceLock<Arc<SyncOrchestrator<S>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<S: PageSurface> ChatAdapter<S> {
    /// Create an adapter over `surface`.
    ///
    /// # Errors
    /// Returns error if the configured traffic pattern is invalid.
    pub fn new(surface: S, config: AdapterConfig) -> Result<Self, ConfigError> {
        let pattern = config.traffic_pattern()?;
        let id = Uuid::new_v4();
        let state = SessionStateCell::new();
        let bus = EventBus::new(AdapterHandle::new(id, state.subscribe()));

        Ok(Self {
            id,
            surface: Arc::new(surface),
            config: Arc::new(config),
            pattern,
            state,
            bus,
            released: AtomicBool::new(false),
            orchestrator: OnceLock::new(),
            listener: Mutex::new(None),
        })
    }

    #[must_use]
    pub const fn id(&self) -> AdapterId {
        self.id
    }

    /// Subscription point for every adapter event.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Back-reference handed to event handlers.
    #[must_use]
    pub fn handle(&self) -> AdapterHandle {
        AdapterHandle::new(self.id, self.state.subscribe())
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Sync orchestrator, once the session is authenticated.
    #[must_use]
    pub fn orchestrator(&self) -> Option<Arc<SyncOrchestrator<S>>> {
        self.orchestrator.get().cloned()
    }

    /// Log in and, on success, start relaying messages.
    ///
    /// Returns once the session is established and sync is listening, or
    /// once it has terminated. Login failures are reported as `loginFailed`
    /// and other failures as `error`; both release the page. The returned
    /// state says which way it went.
    ///
    /// # Errors
    /// Returns error only if an `error` handler itself fails.
    pub async fn start(
        &self,
        credentials: AccountCredentials,
    ) -> Result<SessionState, HandlerError> {
        if self.state.get() != SessionState::Initializing || self.orchestrator.get().is_some() {
            warn!(state = %self.state.get(), "start called on a live adapter");
            self.bus
                .publish(AdapterEvent::error(AdapterError::AlreadyStarted))
                .await?;
            return Ok(self.state.get());
        }

        info!(adapter = %self.id, username = %credentials.username, "starting session");
        if let Err(err) = self.establish(credentials).await {
            error!(error = %err, "session failed");
            self.release_surface().await;
            self.state.fail_and_close();
            self.bus.publish(AdapterEvent::error(err)).await?;
        }
        Ok(self.state.get())
    }

    /// Stop relaying, release the page and publish `close`.
    ///
    /// A pass already in flight finishes publishing first, so `close` is
    /// the last event and the page is not released under it.
    ///
    /// # Errors
    /// Returns error if a `close` handler fails.
    pub async fn shutdown(&self) -> Result<(), HandlerError> {
        self.stop_listener();
        if let Some(orchestrator) = self.orchestrator.get() {
            orchestrator.stop().await;
        }
        if self.state.get() == SessionState::Closed {
            return Ok(());
        }

        self.release_surface().await;
        self.state.fail_and_close();
        self.bus.publish(AdapterEvent::Close).await
    }

    async fn establish(&self, credentials: AccountCredentials) -> Result<(), AdapterError> {
        let login = Login {
            surface: self.surface.as_ref(),
            config: self.config.as_ref(),
            pattern: &self.pattern,
            bus: &self.bus,
            state: &self.state,
        };

        match login.run(credentials).await? {
            LoginOutcome::Authenticated => {
                self.bus.publish(AdapterEvent::LoginSucceeded).await?;
                self.start_sync();
            }
            LoginOutcome::Failed(failure) => {
                self.bus
                    .publish(AdapterEvent::LoginFailed {
                        message: failure.to_string(),
                    })
                    .await?;
                self.bus.publish(AdapterEvent::Close).await?;
                self.release_surface().await;
                self.state.transition(SessionState::Closed)?;
            }
        }
        Ok(())
    }

    fn start_sync(&self) {
        let engine = SyncEngine::new(Arc::clone(&self.surface), Arc::clone(&self.config));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            engine,
            Arc::clone(&self.surface),
            Arc::clone(&self.config),
            self.bus.clone(),
        ));
        let listener = Arc::clone(&orchestrator).listen(self.pattern.clone());

        let _ = self.orchestrator.set(orchestrator);
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        info!("sync listener running");
    }

    fn stop_listener(&self) {
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }

    async fn release_surface(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.surface.release().await {
            warn!(error = %err, "failed to release page");
        }
    }
}

impl<S: PageSurface> Drop for ChatAdapter<S> {
    fn drop(&mut self) {
        self.stop_listener();
        if let Some(orchestrator) = self.orchestrator.get() {
            orchestrator.abort();
        }
    }
}
