use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque identifier of the conversation a message came from.
#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct ChatId(String);

/// Identifier of a single message within its conversation.
#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value.to_string())
            }
        }

        /// Chat platforms send these as numbers or strings; both are accepted.
        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                Ok(match RawId::deserialize(deserializer)? {
                    RawId::Text(s) => Self(s),
                    RawId::Number(n) => Self(n.to_string()),
                })
            }
        }
    };
}

string_id!(ChatId);
string_id!(MessageId);

/// The store-level uniqueness key for a message: message ids are only unique within a chat, so
/// the key combines both.
pub fn idempotency_key(chat_id: &ChatId, message_id: &MessageId) -> String {
    format!("{chat_id}:{message_id}")
}

#[test]
fn test_idempotency_key_is_scoped_to_chat() {
    let a = idempotency_key(&ChatId::from("42"), &MessageId::from("7"));
    let b = idempotency_key(&ChatId::from("43"), &MessageId::from("7"));
    assert_eq!(a, "42:7");
    assert_ne!(a, b);
}

#[test]
fn test_numeric_ids_deserialize() {
    let ids: (ChatId, MessageId) = serde_json::from_str(r#"[-1001234, "77"]"#).unwrap();
    assert_eq!(ids.0.as_str(), "-1001234");
    assert_eq!(ids.1, MessageId::from("77"));
    assert_eq!(serde_json::to_string(&ids.0).unwrap(), r#""-1001234""#);
}
