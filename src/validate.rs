//! The last gate before the ledger: coerces a `Candidate` into a `Transaction` or reports the
//! first invariant it breaks.

use crate::model::{Candidate, Transaction};
use crate::normalize::{
    clean_text, normalize_category, truncate_chars, MAX_DESCRIPTION_CHARS,
};
use crate::rejection::Rejection;
use chrono::NaiveDate;
use tracing::debug;

/// Checks, in order, the amount, the direction, the date (resolved and not after `reference`),
/// and the description. `reference` is the receipt date in the configured offset.
///
/// Validation has no side effects, so calling it twice on the same candidate gives equal
/// results apart from the generated transaction id.
pub fn validate(candidate: Candidate, reference: NaiveDate) -> Result<Transaction, Rejection> {
    let amount = candidate.amount?;
    let direction = candidate.direction.ok_or(Rejection::AmbiguousDirection)?;
    let occurred_on = candidate.occurred_on?;
    if occurred_on > reference {
        debug!("Rejected future date {occurred_on} (reference {reference})");
        return Err(Rejection::InvalidDate);
    }
    let description = truncate_chars(&clean_text(&candidate.description), MAX_DESCRIPTION_CHARS);
    if description.is_empty() {
        return Err(Rejection::EmptyDescription);
    }

    Ok(Transaction {
        transaction_id: Transaction::generate_id(),
        chat_id: candidate.chat_id,
        message_id: candidate.message_id,
        direction,
        amount,
        description,
        category: normalize_category(&candidate.category),
        occurred_on,
        received_at: candidate.received_at,
        recorded_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, ChatId, Direction, MessageId};
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn candidate() -> Candidate {
        Candidate {
            chat_id: ChatId::from("42"),
            message_id: MessageId::from("7"),
            received_at: Utc.with_ymd_and_hms(2024, 3, 10, 15, 0, 0).unwrap(),
            direction: Some(Direction::Outflow),
            amount: Amount::from_str("35,90").map_err(|_| Rejection::InvalidAmount),
            occurred_on: Ok(date(2024, 3, 10)),
            description: "  frete   sedex ".to_string(),
            category: "Logística".to_string(),
        }
    }

    #[test]
    fn test_accepts_and_coerces() {
        let tx = validate(candidate(), date(2024, 3, 10)).unwrap();
        assert_eq!(tx.description(), "frete sedex");
        assert_eq!(tx.category(), "logística");
        assert_eq!(tx.recorded_at(), None);
        assert!(tx.transaction_id().starts_with("tx-"));
    }

    #[test]
    fn test_amount_is_checked_before_date() {
        let mut c = candidate();
        c.amount = Err(Rejection::InvalidAmount);
        c.occurred_on = Err(Rejection::InvalidDate);
        assert_eq!(validate(c, date(2024, 3, 10)), Err(Rejection::InvalidAmount));
    }

    #[test]
    fn test_direction_is_checked_before_date() {
        let mut c = candidate();
        c.direction = None;
        c.occurred_on = Err(Rejection::InvalidDate);
        assert_eq!(
            validate(c, date(2024, 3, 10)),
            Err(Rejection::AmbiguousDirection)
        );
    }

    #[test]
    fn test_date_is_checked_before_description() {
        let mut c = candidate();
        c.occurred_on = Ok(date(2024, 3, 11));
        c.description = String::new();
        assert_eq!(validate(c, date(2024, 3, 10)), Err(Rejection::InvalidDate));
    }

    #[test]
    fn test_past_dates_are_allowed() {
        let mut c = candidate();
        c.occurred_on = Ok(date(2019, 1, 1));
        assert!(validate(c, date(2024, 3, 10)).is_ok());
    }

    #[test]
    fn test_empty_description() {
        let mut c = candidate();
        c.description = " \t ".to_string();
        assert_eq!(
            validate(c, date(2024, 3, 10)),
            Err(Rejection::EmptyDescription)
        );
    }

    #[test]
    fn test_long_fields_are_truncated() {
        let mut c = candidate();
        c.description = "a".repeat(250);
        c.category = "b".repeat(70);
        let tx = validate(c, date(2024, 3, 10)).unwrap();
        assert_eq!(tx.description().chars().count(), 200);
        assert_eq!(tx.category().chars().count(), 50);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let a = validate(candidate(), date(2024, 3, 10)).unwrap();
        let b = validate(candidate(), date(2024, 3, 10)).unwrap();
        assert_eq!(a.to_row().get("idempotency_key"), b.to_row().get("idempotency_key"));
        assert_eq!(a.amount(), b.amount());
        assert_eq!(a.description(), b.description());
        assert_eq!(a.occurred_on(), b.occurred_on());
    }
}
