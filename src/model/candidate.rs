use crate::model::{Amount, ChatId, Direction, MessageId};
use crate::rejection::Rejection;
use chrono::{DateTime, NaiveDate, Utc};

/// An extracted but not yet validated transaction. Fields that could not be resolved keep the
/// rejection they would produce, so the validator can report them in its fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub(crate) chat_id: ChatId,
    pub(crate) message_id: MessageId,
    pub(crate) received_at: DateTime<Utc>,
    pub(crate) direction: Option<Direction>,
    pub(crate) amount: Result<Amount, Rejection>,
    pub(crate) occurred_on: Result<NaiveDate, Rejection>,
    pub(crate) description: String,
    pub(crate) category: String,
}

impl Candidate {
    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub fn amount(&self) -> Result<Amount, &Rejection> {
        self.amount.as_ref().copied()
    }

    pub fn occurred_on(&self) -> Result<NaiveDate, &Rejection> {
        self.occurred_on.as_ref().copied()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}
