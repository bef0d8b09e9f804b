//! Adapter configuration: timings, traffic pattern and page selectors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::{DEFAULT_TRAFFIC_PATTERN, TrafficPattern};

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid traffic pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Selectors for every element the core reads or drives.
///
/// Defaults match the current markup of the chat application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub app_content: String,
    pub login_section: String,

    pub popup: String,
    pub popup_button: String,

    pub email_input: String,
    pub password_input: String,
    pub login_button: String,

    pub login_failed_message: String,
    pub another_app_open_message: String,
    pub verification_code_message: String,

    pub notification_icon: String,
    pub chat_entry: String,
    pub active_chat_entry: String,
    pub messages_list: String,

    pub unread_messages_notice: String,
    pub message: String,
    pub message_author: String,
    pub message_time: String,
    pub message_text: String,
    pub message_image: String,

    /// Attribute holding a message's id.
    pub message_id_attribute: String,
    /// Attribute holding a chat list entry's id.
    pub chat_id_attribute: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            app_content: "#mainApp #default_content".into(),
            login_section: "#login_wrap_section".into(),
            popup: "#layer_contents".into(),
            popup_button: "[type='button']".into(),
            email_input: "#line_login_email".into(),
            password_input: "#line_login_pwd".into(),
            login_button: "#login_btn:not([disabled])".into(),
            login_failed_message: "#login_area #login_incorrect".into(),
            another_app_open_message: "#login_area .MdTxtInfo02".into(),
            verification_code_message: "#login_area .mdCMN01Code".into(),
            notification_icon: ".MdIcoBadge01:not(.MdNonDisp)".into(),
            chat_entry: "[data-chatid]".into(),
            active_chat_entry: "[data-chatid].ExSelected".into(),
            messages_list: "#_chat_room_msg_list".into(),
            unread_messages_notice: ".mdRGT10Unread.MdRGT10Notice".into(),
            message: ".MdRGT07Cont".into(),
            message_author: ".mdRGT07Ttl".into(),
            message_time: ".mdRGT07Date time".into(),
            message_text: ".mdRGT07MsgTextInner".into(),
            message_image: ".mdRGT07Image".into(),
            message_id_attribute: "data-local-id".into(),
            chat_id_attribute: "data-chatid".into(),
        }
    }
}

impl Selectors {
    /// Message elements inside the open conversation.
    #[must_use]
    pub fn messages_in_list(&self) -> String {
        format!("{} {}", self.messages_list, self.message)
    }

    /// The message element carrying `id`.
    #[must_use]
    pub fn message_by_id(&self, id: &str) -> String {
        format!(
            "{}[{}='{}']",
            self.message,
            self.message_id_attribute,
            id.replace('\'', "\\'")
        )
    }
}

/// Adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Wait inserted where rendering has no completion signal.
    pub settle_delay_ms: u64,
    /// Bound on waiting for the login request's response.
    pub response_timeout_ms: u64,
    /// Bound on the login outcome race.
    pub outcome_timeout_ms: u64,
    /// Bound on waiting for the verification code to be confirmed.
    pub verification_timeout_ms: u64,
    /// Bound on waiting for the login form, submit control and message list.
    pub render_timeout_ms: u64,
    /// Regex over response URLs identifying the application's traffic.
    pub traffic_pattern: String,
    /// Popup button label that is safe to click away.
    pub popup_confirm_label: String,
    pub selectors: Selectors,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            response_timeout_ms: 30_000,
            outcome_timeout_ms: 30_000,
            verification_timeout_ms: 160_000,
            render_timeout_ms: 30_000,
            traffic_pattern: DEFAULT_TRAFFIC_PATTERN.to_string(),
            popup_confirm_label: "OK".to_string(),
            selectors: Selectors::default(),
        }
    }
}

impl AdapterConfig {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    ///
    /// # Errors
    /// Returns error on malformed JSON or an invalid traffic pattern.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.traffic_pattern()?;
        Ok(config)
    }

    /// Compile the traffic pattern.
    ///
    /// # Errors
    /// Returns error if the pattern is not a valid regex.
    pub fn traffic_pattern(&self) -> Result<TrafficPattern, ConfigError> {
        Ok(TrafficPattern::new(&self.traffic_pattern)?)
    }

    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    #[must_use]
    pub const fn outcome_timeout(&self) -> Duration {
        Duration::from_millis(self.outcome_timeout_ms)
    }

    #[must_use]
    pub const fn verification_timeout(&self) -> Duration {
        Duration::from_millis(self.verification_timeout_ms)
    }

    #[must_use]
    pub const fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = AdapterConfig::from_json_str(
            r#"{ "settle_delay_ms": 50, "selectors": { "message": ".Msg" } }"#,
        )
        .unwrap();
        assert_eq!(config.settle_delay(), Duration::from_millis(50));
        assert_eq!(config.verification_timeout(), Duration::from_secs(160));
        assert_eq!(config.selectors.message, ".Msg");
        assert_eq!(config.selectors.login_section, "#login_wrap_section");
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = AdapterConfig::from_json_str(r#"{ "traffic_pattern": "(" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Pattern(_)));
    }

    #[test]
    fn test_message_by_id_selector() {
        let selectors = Selectors::default();
        assert_eq!(
            selectors.message_by_id("42"),
            ".MdRGT07Cont[data-local-id='42']"
        );
        assert_eq!(
            selectors.messages_in_list(),
            "#_chat_room_msg_list .MdRGT07Cont"
        );
    }
}
