//! Page Surface contract: the capabilities the core needs from a live,
//! browser-rendered document.
//!
//! Implemented by the browser-automation layer. The core never sees the
//! browser itself, only these query/observe/interact operations.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::network::{NetworkResponse, TrafficPattern, next_matching};

/// Interval at which the default `wait_for*` implementations re-query.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Surface error.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Element not found: {selector}")]
    NotFound { selector: String },
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("Element is no longer attached to the document")]
    Detached,
    #[error("Page unavailable: {0}")]
    Unavailable(String),
    #[error("Page closed")]
    Closed,
}

impl SurfaceError {
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Handle to one element of the live document.
///
/// Every read is evaluated against the document at call time.
#[async_trait]
pub trait ElementHandle: Clone + Send + Sync + 'static {
    /// Text content, `None` if the element has none.
    async fn text(&self) -> Result<Option<String>, SurfaceError>;

    /// Attribute value by name (e.g. `data-local-id`).
    async fn attribute(&self, name: &str) -> Result<Option<String>, SurfaceError>;

    /// Whether the element itself matches `selector`.
    async fn matches(&self, selector: &str) -> Result<bool, SurfaceError>;

    /// First descendant matching `selector`.
    async fn query(&self, selector: &str) -> Result<Option<Self>, SurfaceError>;

    /// Next element sibling in document order.
    async fn next_sibling(&self) -> Result<Option<Self>, SurfaceError>;

    /// Nearest ancestor (or self) matching `selector`.
    async fn closest(&self, selector: &str) -> Result<Option<Self>, SurfaceError>;

    async fn click(&self) -> Result<(), SurfaceError>;
}

/// A live rendered page.
#[async_trait]
pub trait PageSurface: Send + Sync + 'static {
    type Element: ElementHandle;

    /// Load the application page.
    async fn open(&self) -> Result<(), SurfaceError>;

    /// Release the underlying browser resource.
    async fn release(&self) -> Result<(), SurfaceError>;

    /// First element matching `selector`, if present now.
    async fn find(&self, selector: &str) -> Result<Option<Self::Element>, SurfaceError>;

    /// All elements matching `selector`, in document order.
    async fn find_all(&self, selector: &str) -> Result<Vec<Self::Element>, SurfaceError>;

    /// Type `text` into the input matching `selector`.
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), SurfaceError>;

    /// Subscribe to completed network exchanges.
    fn responses(&self) -> broadcast::Receiver<NetworkResponse>;

    /// Wait until `selector` appears.
    ///
    /// # Errors
    /// Returns `Timeout` if it does not appear within `timeout`.
    async fn wait_for(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Self::Element, SurfaceError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(element) = self.find(selector).await? {
                return Ok(element);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SurfaceError::Timeout {
                    what: selector.to_string(),
                    after: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Race several selectors; returns the first element to appear and the
    /// index of the selector it matched. Earlier selectors win ties.
    ///
    /// # Errors
    /// Returns `Timeout` if none appears within `timeout`.
    async fn wait_for_first_of(
        &self,
        selectors: &[&str],
        timeout: Duration,
    ) -> Result<(Self::Element, usize), SurfaceError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for (index, selector) in selectors.iter().enumerate() {
                if let Some(element) = self.find(selector).await? {
                    return Ok((element, index));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SurfaceError::Timeout {
                    what: selectors.join(", "),
                    after: timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Suspend until a response matching `pattern` completes.
    ///
    /// # Errors
    /// Returns `Timeout` if none completes within `timeout`.
    async fn wait_for_response(
        &self,
        pattern: &TrafficPattern,
        timeout: Duration,
    ) -> Result<NetworkResponse, SurfaceError> {
        let mut responses = self.responses();
        next_matching(&mut responses, pattern, timeout).await
    }

    /// Fixed settle delay.
    async fn wait_for_millis(&self, millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}
