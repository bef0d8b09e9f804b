//! Data model shared by the session, sync and event layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Login credentials for one account.
#[derive(Clone, Deserialize)]
pub struct AccountCredentials {
    pub username: String,
    pub password: String,
}

impl AccountCredentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Surface is being opened.
    Initializing,
    /// Login form is being filled in.
    AwaitingLoginSubmission,
    /// Login was submitted, outcome not yet known.
    AwaitingLoginResult,
    /// The app displayed a code that must be confirmed on another device.
    AwaitingVerificationCode,
    /// Logged in; sync is running.
    Authenticated,
    /// Login did not succeed.
    Failed,
    /// Surface released.
    Closed,
}

impl SessionState {
    const fn rank(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::AwaitingLoginSubmission => 1,
            Self::AwaitingLoginResult => 2,
            Self::AwaitingVerificationCode => 3,
            Self::Authenticated | Self::Failed => 4,
            Self::Closed => 5,
        }
    }

    /// Whether no further login progress can happen from this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Authenticated | Self::Failed | Self::Closed)
    }

    /// Whether `next` is a legal successor. States only move forward;
    /// `Closed` follows only `Authenticated` or `Failed`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Closed, _) => false,
            (Self::Authenticated | Self::Failed, Self::Closed) => true,
            (Self::Authenticated | Self::Failed, _) => false,
            (_, Self::Closed) => false,
            (_, Self::Failed) => true,
            (from, to) => to.rank() > from.rank(),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::AwaitingLoginSubmission => "awaiting_login_submission",
            Self::AwaitingLoginResult => "awaiting_login_result",
            Self::AwaitingVerificationCode => "awaiting_verification_code",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Opaque chat identifier, as assigned by the chat list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Placeholder for an open conversation whose entry could not be resolved.
    #[must_use]
    pub fn unresolved() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unresolved() {
            f.write_str("<unresolved>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Opaque message identifier. Only meaningful within one chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One conversation surface, re-resolved on every discovery pass.
#[derive(Debug, Clone)]
pub struct Chat<E> {
    pub id: ChatId,
    pub handle: E,
}

/// Classified message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    Text { text: String },
    Image,
    Unsupported,
}

impl MessageKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image => "image",
            Self::Unsupported => "unsupported",
        }
    }
}

/// A message discovered during a sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat: ChatId,
    pub sender: String,
    /// Timestamp exactly as rendered.
    pub time: String,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl Message {
    /// Text payload, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<TextMessage> {
        match &self.kind {
            MessageKind::Text { text } => Some(TextMessage {
                sender: self.sender.clone(),
                time: self.time.clone(),
                text: text.clone(),
            }),
            _ => None,
        }
    }

    /// Image payload, if this is an image message.
    #[must_use]
    pub fn as_image(&self) -> Option<ImageMessage> {
        match self.kind {
            MessageKind::Image => Some(ImageMessage {
                sender: self.sender.clone(),
                time: self.time.clone(),
            }),
            _ => None,
        }
    }
}

/// Payload of the `text` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub sender: String,
    pub time: String,
    pub text: String,
}

/// Payload of the `image` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMessage {
    pub sender: String,
    pub time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    use SessionState::*;

    #[test]
    fn test_states_only_move_forward() {
        assert!(Initializing.can_transition_to(AwaitingLoginSubmission));
        assert!(AwaitingLoginResult.can_transition_to(Authenticated));
        assert!(AwaitingVerificationCode.can_transition_to(Authenticated));
        assert!(!AwaitingLoginResult.can_transition_to(AwaitingLoginSubmission));
        assert!(!Authenticated.can_transition_to(AwaitingLoginSubmission));
        assert!(!Authenticated.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Authenticated));
    }

    #[test]
    fn test_closed_follows_only_terminal_states() {
        assert!(Authenticated.can_transition_to(Closed));
        assert!(Failed.can_transition_to(Closed));
        assert!(!AwaitingLoginResult.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Initializing));
    }

    #[test]
    fn test_failed_reachable_from_any_pending_state() {
        for state in [
            Initializing,
            AwaitingLoginSubmission,
            AwaitingLoginResult,
            AwaitingVerificationCode,
        ] {
            assert!(state.can_transition_to(Failed), "{state}");
        }
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = AccountCredentials::new("user@example.com", "secret");
        let printed = format!("{creds:?}");
        assert!(printed.contains("user@example.com"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_message_serialization_flattens_kind() {
        let msg = Message {
            id: MessageId::new("m1"),
            chat: ChatId::new("c1"),
            sender: "Alice".to_string(),
            time: "10:42".to_string(),
            kind: MessageKind::Text {
                text: "hi".to_string(),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hi");
        assert_eq!(json["chat"], "c1");
    }

    #[test]
    fn test_classified_payloads() {
        let image = Message {
            id: MessageId::new("m2"),
            chat: ChatId::new("c1"),
            sender: "Bob".to_string(),
            time: "10:43".to_string(),
            kind: MessageKind::Image,
        };
        assert!(image.as_text().is_none());
        assert_eq!(image.as_image().unwrap().sender, "Bob");
    }
}
