use crate::model::{ChatId, User, UserColumn};
use crate::store::{Appended, Store, Table};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Remembers who the bot has talked to. The first registration for a chat wins; later ones
/// return the stored user unchanged.
#[derive(Clone)]
pub struct UserRegistry {
    store: Arc<dyn Store>,
}

impl UserRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn register(
        &self,
        chat_id: &ChatId,
        display_name: Option<&str>,
        first_seen: DateTime<Utc>,
    ) -> Result<User> {
        let user = User::new(chat_id.clone(), display_name, first_seen);
        let appended = self
            .store
            .append_unique(Table::Usuarios, user.to_row())
            .await
            .with_context(|| format!("Unable to register chat {chat_id}"))?;
        match appended {
            Appended::Inserted => {
                info!(chat_id = %chat_id, "Registered {}", user.display_name());
                Ok(user)
            }
            Appended::Duplicate(existing) => User::from_row(&existing),
        }
    }

    pub async fn get(&self, chat_id: &ChatId) -> Result<Option<User>> {
        let rows = self
            .store
            .find_by(
                Table::Usuarios,
                &UserColumn::ChatId.to_string(),
                chat_id.as_str(),
            )
            .await
            .with_context(|| format!("Unable to look up chat {chat_id}"))?;
        rows.first().map(User::from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ANONYMOUS_NAME;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_first_registration_wins() {
        let store = Arc::new(MemoryStore::new());
        let users = UserRegistry::new(store.clone());
        let chat = ChatId::from("42");
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();

        let ana = users.register(&chat, Some("Ana"), first).await.unwrap();
        let again = users.register(&chat, Some("Ana Maria"), later).await.unwrap();
        assert_eq!(again, ana);
        assert_eq!(again.first_seen(), first);
        assert_eq!(store.rows(Table::Usuarios).len(), 1);
        assert_eq!(users.get(&chat).await.unwrap(), Some(ana));
    }

    #[tokio::test]
    async fn test_unknown_and_anonymous() {
        let users = UserRegistry::new(Arc::new(MemoryStore::new()));
        assert_eq!(users.get(&ChatId::from("1")).await.unwrap(), None);
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let user = users.register(&ChatId::from("1"), None, at).await.unwrap();
        assert_eq!(user.display_name(), ANONYMOUS_NAME);
    }
}
