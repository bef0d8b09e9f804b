//! Typed event bus for adapter lifecycle and message events.
//!
//! Handlers are async and dispatched sequentially in registration order,
//! so a slow handler delays the ones after it for the same publish.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::model::{ImageMessage, Message, SessionState, TextMessage};

/// Adapter identifier.
pub type AdapterId = Uuid;

/// Error type handlers may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error carried by the `error` event.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result returned by event handlers.
pub type HandlerResult = Result<(), BoxError>;

/// Event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Open,
    Close,
    Error,
    LoginSucceeded,
    LoginFailed,
    VerificationCode,
    Message,
    Text,
    Image,
}

impl EventKind {
    pub const ALL: [Self; 9] = [
        Self::Open,
        Self::Close,
        Self::Error,
        Self::LoginSucceeded,
        Self::LoginFailed,
        Self::VerificationCode,
        Self::Message,
        Self::Text,
        Self::Image,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Error => "error",
            Self::LoginSucceeded => "loginSucceeded",
            Self::LoginFailed => "loginFailed",
            Self::VerificationCode => "verificationCode",
            Self::Message => "message",
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads, one variant per [`EventKind`].
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Open,
    Close,
    Error { error: SharedError },
    LoginSucceeded,
    LoginFailed { message: String },
    VerificationCode { verification_code: String },
    Message { message: Message },
    Text { message: TextMessage },
    Image { message: ImageMessage },
}

impl AdapterEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Close => EventKind::Close,
            Self::Error { .. } => EventKind::Error,
            Self::LoginSucceeded => EventKind::LoginSucceeded,
            Self::LoginFailed { .. } => EventKind::LoginFailed,
            Self::VerificationCode { .. } => EventKind::VerificationCode,
            Self::Message { .. } => EventKind::Message,
            Self::Text { .. } => EventKind::Text,
            Self::Image { .. } => EventKind::Image,
        }
    }

    /// Wrap any error into an `error` event.
    #[must_use]
    pub fn error(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Error {
            error: Arc::new(error),
        }
    }
}

/// Back-reference to the adapter that published an event.
#[derive(Debug, Clone)]
pub struct AdapterHandle {
    id: AdapterId,
    state: watch::Receiver<SessionState>,
}

impl AdapterHandle {
    #[must_use]
    pub const fn new(id: AdapterId, state: watch::Receiver<SessionState>) -> Self {
        Self { id, state }
    }

    #[must_use]
    pub const fn id(&self) -> AdapterId {
        self.id
    }

    /// Session state at the time of the call.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver for state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

/// What a handler receives: the event plus the publishing adapter.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub adapter: AdapterHandle,
    pub event: AdapterEvent,
}

/// Registration identifier returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

/// A handler failed; dispatch for that publish stopped.
#[derive(Debug, Error)]
#[error("{event} handler failed: {source}")]
pub struct HandlerError {
    pub event: EventKind,
    #[source]
    pub source: BoxError,
}

type Handler = Arc<dyn Fn(Envelope) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

struct Registration {
    id: HandlerId,
    handler: Handler,
}

/// Publish/subscribe register keyed by [`EventKind`].
///
/// Cheap to clone; clones share registrations.
#[derive(Clone)]
pub struct EventBus {
    origin: AdapterHandle,
    handlers: Arc<RwLock<HashMap<EventKind, Vec<Registration>>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("adapter", &self.origin.id())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a bus whose envelopes reference `origin`.
    #[must_use]
    pub fn new(origin: AdapterHandle) -> Self {
        Self {
            origin,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handler for `kind`.
    pub fn subscribe<F, Fut>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = HandlerId(Uuid::new_v4());
        let handler: Handler = Arc::new(move |envelope| Box::pin(handler(envelope)));

        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(Registration { id, handler });

        id
    }

    /// Remove a registration. Returns whether it was found.
    pub fn unsubscribe(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(registrations) = handlers.get_mut(&kind) else {
            return false;
        };
        match registrations.iter().position(|r| r.id == id) {
            Some(index) => {
                registrations.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of handlers currently registered for `kind`.
    #[must_use]
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's kind, one at a time.
    ///
    /// Handlers registered while this call is running are not invoked.
    ///
    /// # Errors
    /// Returns the first handler failure; later handlers are skipped.
    pub async fn publish(&self, event: AdapterEvent) -> Result<(), HandlerError> {
        let kind = event.kind();
        let snapshot: Vec<Handler> = {
            let handlers = self
                .handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match handlers.get(&kind) {
                Some(registrations) if !registrations.is_empty() => registrations
                    .iter()
                    .map(|r| Arc::clone(&r.handler))
                    .collect(),
                _ => return Ok(()),
            }
        };

        tracing::trace!(event = %kind, handlers = snapshot.len(), "publishing");

        for handler in snapshot {
            let envelope = Envelope {
                adapter: self.origin.clone(),
                event: event.clone(),
            };
            handler(envelope)
                .await
                .map_err(|source| HandlerError { event: kind, source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn bus() -> EventBus {
        let (_tx, rx) = watch::channel(SessionState::Initializing);
        EventBus::new(AdapterHandle::new(Uuid::new_v4(), rx))
    }

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        label: &'static str,
    ) -> impl Fn(Envelope) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_envelope| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(label.to_string());
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let bus = bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventKind::Open, recorder(&log, "first"));
        bus.subscribe(EventKind::Open, recorder(&log, "second"));
        bus.subscribe(EventKind::Close, recorder(&log, "other"));

        bus.publish(AdapterEvent::Open).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_publish_awaits_each_handler() {
        let bus = bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        let slow_log = Arc::clone(&log);
        bus.subscribe(EventKind::Open, move |_| {
            let log = Arc::clone(&slow_log);
            async move {
                tokio::task::yield_now().await;
                log.lock().unwrap().push("slow".to_string());
                Ok(())
            }
        });
        bus.subscribe(EventKind::Open, recorder(&log, "fast"));

        bus.publish(AdapterEvent::Open).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_only_that_registration() {
        let bus = bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = bus.subscribe(EventKind::Text, recorder(&log, "first"));
        bus.subscribe(EventKind::Text, recorder(&log, "second"));

        assert!(bus.unsubscribe(EventKind::Text, first));
        assert!(!bus.unsubscribe(EventKind::Text, first));
        assert!(!bus.unsubscribe(EventKind::Image, first));

        bus.publish(AdapterEvent::Text {
            message: TextMessage {
                sender: "a".into(),
                time: "t".into(),
                text: "x".into(),
            },
        })
        .await
        .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["second"]);
        assert_eq!(bus.handler_count(EventKind::Text), 1);
    }

    #[tokio::test]
    async fn test_publish_without_handlers_is_noop() {
        let bus = bus();
        tokio_test::assert_ok!(bus.publish(AdapterEvent::LoginSucceeded).await);
        assert_eq!(bus.handler_count(EventKind::LoginSucceeded), 0);
    }

    #[tokio::test]
    async fn test_handler_error_stops_dispatch() {
        let bus = bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventKind::LoginFailed, |_| async {
            Err::<(), BoxError>("boom".into())
        });
        bus.subscribe(EventKind::LoginFailed, recorder(&log, "after"));

        let err = bus
            .publish(AdapterEvent::LoginFailed {
                message: "nope".into(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.event, EventKind::LoginFailed);
        assert!(err.to_string().contains("boom"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_envelope_carries_adapter_and_payload() {
        let (tx, rx) = watch::channel(SessionState::Initializing);
        let id = Uuid::new_v4();
        let bus = EventBus::new(AdapterHandle::new(id, rx));
        let seen = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&seen);
        bus.subscribe(EventKind::VerificationCode, move |envelope: Envelope| {
            let sink = Arc::clone(&sink);
            async move {
                if let AdapterEvent::VerificationCode { verification_code } = envelope.event {
                    *sink.lock().unwrap() =
                        Some((envelope.adapter.id(), envelope.adapter.state(), verification_code));
                }
                Ok(())
            }
        });

        tx.send(SessionState::AwaitingVerificationCode).unwrap();
        bus.publish(AdapterEvent::VerificationCode {
            verification_code: "1234".into(),
        })
        .await
        .unwrap();

        assert_eq!(
            seen.lock().unwrap().clone(),
            Some((id, SessionState::AwaitingVerificationCode, "1234".to_string()))
        );
    }
}
