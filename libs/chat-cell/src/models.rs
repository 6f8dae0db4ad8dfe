// libs/chat-cell/src/models.rs
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel id of the canonical welcome message.
pub const INITIAL_MESSAGE_ID: &str = "initial-message";

/// Reserved text command that resets the conversation on both sides.
pub const RESTART_COMMAND: &str = "/restart";

pub const WELCOME_TEXT: &str =
    "Hi! I'm your care assistant. How can I help you today?";
pub const APOLOGY_TEXT: &str =
    "Sorry, something went wrong on our side. Please try again or restart the conversation.";
pub const RESTART_NOTICE_TEXT: &str = "Conversation restarted.";
pub const SEND_TIMEOUT_TEXT: &str =
    "The assistant is taking too long to respond. Please try again.";
pub const RECONNECTING_TEXT: &str = "Connection lost. Reconnecting...";
pub const RECONNECTED_TEXT: &str = "Reconnected. You can continue the conversation.";
pub const RECONNECT_FAILED_TEXT: &str =
    "We couldn't reach the assistant. Please check your connection and try again.";
pub const SEND_FAILED_TEXT: &str =
    "Your message couldn't be sent. Please try again.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "bot")]
    Bot,
}

/// One exchanged utterance in the transcript. At most one message with
/// `is_typing = true` is visible at any moment; the placeholder is always
/// removed before the resolved message takes its slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_typing: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("user-{}", timestamp.timestamp_millis()),
            role: MessageRole::User,
            content: content.into(),
            timestamp,
            is_typing: false,
        }
    }

    pub fn bot(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("bot-{}", timestamp.timestamp_millis()),
            role: MessageRole::Bot,
            content: content.into(),
            timestamp,
            is_typing: false,
        }
    }

    pub fn welcome(timestamp: DateTime<Utc>) -> Self {
        Self {
            id: INITIAL_MESSAGE_ID.to_string(),
            role: MessageRole::Bot,
            content: WELCOME_TEXT.to_string(),
            timestamp,
            is_typing: false,
        }
    }

    /// Ephemeral bubble shown while a real reply is pending.
    pub fn typing_placeholder(timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("typing-{}", timestamp.timestamp_millis()),
            role: MessageRole::Bot,
            content: String::new(),
            timestamp,
            is_typing: true,
        }
    }
}

/// An item waiting in the outbound-to-UI delivery queue. FIFO, never
/// reordered; exactly one delivery is in flight at a time.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub text: String,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "connecting")]
    Connecting,
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "error")]
    Error,
}

/// Transcript mutations observable by the UI layer.
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    MessageAppended(ChatMessage),
    PlaceholderShown(ChatMessage),
    PlaceholderResolved { placeholder_id: String, message: ChatMessage },
    RecoveryRequired,
    Restarted,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Target perceived latency from server emit to visible text.
    pub response_delay: Duration,
    /// Gap between two consecutive deliveries, so bubbles never burst.
    pub inter_message_gap: Duration,
    pub send_timeout: Duration,
    pub liveness_interval: Duration,
    pub reverify_delay: Duration,
    pub max_connect_attempts: u32,
    pub backoff_base: Duration,
    pub min_connect_interval: Duration,
    pub history_retention_days: i64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            response_delay: Duration::from_millis(1200),
            inter_message_gap: Duration::from_millis(600),
            send_timeout: Duration::from_secs(15),
            liveness_interval: Duration::from_secs(15),
            reverify_delay: Duration::from_secs(2),
            max_connect_attempts: 3,
            backoff_base: Duration::from_secs(2),
            min_connect_interval: Duration::from_secs(1),
            history_retention_days: 7,
        }
    }
}
