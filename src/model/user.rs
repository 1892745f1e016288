use crate::model::transaction::{parse_timestamp, timestamp};
use crate::model::{ChatId, Row};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The name used when the transport does not tell us who is talking.
pub const ANONYMOUS_NAME: &str = "Usuário Anônimo";

/// A person the bot has talked to. Written once, on first contact.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct User {
    chat_id: ChatId,
    display_name: String,
    first_seen: DateTime<Utc>,
}

impl User {
    pub fn new(chat_id: ChatId, display_name: Option<&str>, first_seen: DateTime<Utc>) -> Self {
        let display_name = display_name
            .map(crate::normalize::clean_text)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| ANONYMOUS_NAME.to_string());
        Self {
            chat_id,
            display_name,
            first_seen,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    pub fn to_row(&self) -> Row {
        Row::new()
            .with(UserColumn::ChatId, self.chat_id.as_str())
            .with(UserColumn::DisplayName, &self.display_name)
            .with(UserColumn::FirstSeen, timestamp(self.first_seen))
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        let chat_id = ChatId::from(row.require(UserColumn::ChatId)?);
        let first_seen = parse_timestamp(row.require(UserColumn::FirstSeen)?)
            .with_context(|| format!("Bad first_seen for user {chat_id}"))?;
        Ok(Self {
            display_name: row.require(UserColumn::DisplayName)?.to_string(),
            chat_id,
            first_seen,
        })
    }
}

/// The columns of the `usuarios` table.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserColumn {
    ChatId,
    DisplayName,
    FirstSeen,
}

serde_plain::derive_display_from_serialize!(UserColumn);
serde_plain::derive_fromstr_from_deserialize!(UserColumn);

impl UserColumn {
    pub const ALL: [UserColumn; 3] = [
        UserColumn::ChatId,
        UserColumn::DisplayName,
        UserColumn::FirstSeen,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_blank_name_becomes_anonymous() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(User::new(ChatId::from("1"), None, at).display_name(), ANONYMOUS_NAME);
        assert_eq!(
            User::new(ChatId::from("1"), Some("   "), at).display_name(),
            ANONYMOUS_NAME
        );
        let user = User::new(ChatId::from("1"), Some("  Ana   Maria "), at);
        assert_eq!(user.display_name(), "Ana Maria");
        assert_eq!(User::from_row(&user.to_row()).unwrap(), user);
    }
}
