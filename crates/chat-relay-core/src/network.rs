//! Network activity observed on the page.

use std::time::Duration;

use regex::Regex;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::surface::SurfaceError;

/// Default URL shape of the chat application's API traffic.
pub const DEFAULT_TRAFFIC_PATTERN: &str = r"^https://.+\.line\.naver\.jp/enc$";

/// A completed network exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    pub url: String,
    pub status: u16,
}

impl NetworkResponse {
    #[must_use]
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// URL-shape predicate for the application's traffic.
#[derive(Debug, Clone)]
pub struct TrafficPattern(Regex);

impl TrafficPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    /// Returns error if the expression is not a valid regex.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    #[must_use]
    pub fn matches(&self, response: &NetworkResponse) -> bool {
        self.0.is_match(&response.url)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for TrafficPattern {
    fn default() -> Self {
        Self(Regex::new(DEFAULT_TRAFFIC_PATTERN).expect("default traffic pattern is valid"))
    }
}

/// Wait on an existing subscription for the next response matching `pattern`.
///
/// Subscribe before triggering the request, otherwise the response can be missed.
///
/// # Errors
/// Returns `Timeout` if nothing matches in time, `Closed` if the page went away.
pub async fn next_matching(
    responses: &mut broadcast::Receiver<NetworkResponse>,
    pattern: &TrafficPattern,
    timeout: Duration,
) -> Result<NetworkResponse, SurfaceError> {
    let wait = async {
        loop {
            match responses.recv().await {
                Ok(response) if pattern.matches(&response) => return Ok(response),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "response subscription lagged");
                }
                Err(RecvError::Closed) => return Err(SurfaceError::Closed),
            }
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| SurfaceError::Timeout {
            what: format!("response matching {}", pattern.as_str()),
            after: timeout,
        })?
}
