use crate::model::{ChatId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message as delivered by a chat transport.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
    /// When the transport received the message. Relative dates ("hoje", "ontem") are resolved
    /// against this, never against the time of processing.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl IncomingMessage {
    pub fn new(
        chat_id: impl Into<ChatId>,
        message_id: impl Into<MessageId>,
        text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            text: text.into(),
            received_at,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[test]
fn test_received_at_defaults_when_absent() {
    let before = Utc::now();
    let msg: IncomingMessage =
        serde_json::from_str(r#"{"chat_id":"42","message_id":"7","text":"/saldo"}"#).unwrap();
    assert!(msg.received_at >= before);
    assert_eq!(msg.chat_id, ChatId::from("42"));
    assert_eq!(msg.display_name, None);
}
