//! Types that represent the core data model, such as `Transaction` and `Amount`.
mod amount;
mod candidate;
mod ids;
mod message;
mod month;
mod row;
mod transaction;
mod user;

pub use amount::{format_brl, Amount, AmountError};
pub use candidate::Candidate;
pub use ids::{idempotency_key, ChatId, MessageId};
pub use message::IncomingMessage;
pub use month::{DateRange, Month, MonthError};
pub use row::Row;
pub use transaction::{Direction, Transaction, TransactionColumn};
pub use user::{User, UserColumn, ANONYMOUS_NAME};
