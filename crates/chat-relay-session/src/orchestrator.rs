//! Single-flight scheduling of discovery passes.
//!
//! Network activity arrives in bursts. Each matching response is a hint
//! that messages may have arrived; at most one pass runs at a time and
//! hints that land while a pass is running are dropped.

use std::sync::{
    Arc, Mutex as StdMutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use chat_relay_core::{
    AdapterConfig, AdapterEvent, EventBus, HandlerError, Message, PageSurface, TrafficPattern,
};
use chat_relay_sync::SyncEngine;
use tokio::{
    sync::{Mutex, broadcast::error::RecvError},
    task::{AbortHandle, JoinHandle},
};
use tracing::{debug, error, info, warn};

use crate::error::AdapterError;

/// What happened to a trigger.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A pass was started; the handle completes when it has been published.
    Started(JoinHandle<()>),
    /// A pass was already in flight, or the orchestrator was stopped.
    Dropped,
}

impl TriggerOutcome {
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Runs discovery passes one at a time and fans the results out.
pub struct SyncOrchestrator<S: PageSurface> {
    engine: Arc<Mutex<SyncEngine<S>>>,
    surface: Arc<S>,
    config: Arc<AdapterConfig>,
    bus: EventBus,
    stopped: AtomicBool,
    current: StdMutex<Option<AbortHandle>>,
}

impl<S: PageSurface> SyncOrchestrator<S> {
    #[must_use]
    pub fn new(
        engine: SyncEngine<S>,
        surface: Arc<S>,
        config: Arc<AdapterConfig>,
        bus: EventBus,
    ) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            surface,
            config,
            bus,
            stopped: AtomicBool::new(false),
            current: StdMutex::new(None),
        }
    }

    /// Whether a pass currently holds the gate.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.engine.try_lock().is_err()
    }

    /// Start a pass unless one is in flight.
    ///
    /// The gate is taken before this returns and is released when the
    /// spawned pass finishes, however it finishes.
    #[must_use = "await the handle to observe the pass"]
    pub fn trigger(&self) -> TriggerOutcome {
        if self.stopped.load(Ordering::SeqCst) {
            debug!("sync stopped, dropping signal");
            return TriggerOutcome::Dropped;
        }
        let Ok(mut engine) = Arc::clone(&self.engine).try_lock_owned() else {
            debug!("sync pass in flight, dropping signal");
            return TriggerOutcome::Dropped;
        };

        let surface = Arc::clone(&self.surface);
        let settle = self.config.settle_delay_ms;
        let bus = self.bus.clone();
        let pass = tokio::spawn(async move {
            // Let the DOM catch up with the response that triggered us.
            surface.wait_for_millis(settle).await;
            // The gate stays held until the failure has been reported.
            if let Err(err) = run_pass(&mut engine, &bus).await {
                warn!(error = %err, "sync pass failed");
                if let Err(publish_err) = bus.publish(AdapterEvent::error(err)).await {
                    error!(error = %publish_err, "error handler failed");
                }
            }
            drop(engine);
        });
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(pass.abort_handle());
        TriggerOutcome::Started(pass)
    }

    /// Refuse further passes and wait for the one in flight, if any, to
    /// finish publishing.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        drop(self.engine.lock().await);
        debug!("sync stopped");
    }

    /// Refuse further passes and cancel the one in flight without waiting.
    pub fn abort(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(pass) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pass.abort();
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Trigger a pass for every successful response matching `pattern`,
    /// until the page's response stream closes.
    ///
    /// Subscribes before returning, so no response after this call is missed.
    pub fn listen(self: Arc<Self>, pattern: TrafficPattern) -> JoinHandle<()> {
        let mut responses = self.surface.responses();
        tokio::spawn(async move {
            loop {
                match responses.recv().await {
                    Ok(response) if response.is_ok() && pattern.matches(&response) => {
                        let _ = self.trigger();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "activity signals lagged");
                        let _ = self.trigger();
                    }
                    Err(RecvError::Closed) => {
                        debug!("response stream closed, sync listener stopping");
                        break;
                    }
                }
            }
        })
    }
}

async fn run_pass<S: PageSurface>(
    engine: &mut SyncEngine<S>,
    bus: &EventBus,
) -> Result<(), AdapterError> {
    let messages = engine.discover_new_messages().await?;
    if !messages.is_empty() {
        info!(count = messages.len(), "relaying new messages");
    }
    for message in messages {
        publish_message(bus, message).await?;
    }
    Ok(())
}

/// Publish `message`, then `text` or `image` for the kinds that have one.
async fn publish_message(bus: &EventBus, message: Message) -> Result<(), HandlerError> {
    let text = message.as_text();
    let image = message.as_image();

    bus.publish(AdapterEvent::Message { message }).await?;
    if let Some(message) = text {
        bus.publish(AdapterEvent::Text { message }).await?;
    } else if let Some(message) = image {
        bus.publish(AdapterEvent::Image { message }).await?;
    }
    Ok(())
}
