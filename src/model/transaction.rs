use crate::model::{idempotency_key, Amount, ChatId, MessageId, Row};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Whether money came in or went out.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "entrada")]
    Inflow,
    #[serde(rename = "saida")]
    Outflow,
}

serde_plain::derive_display_from_serialize!(Direction);
serde_plain::derive_fromstr_from_deserialize!(Direction);

impl Direction {
    /// Applies the direction's sign to a positive amount.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Direction::Inflow => amount,
            Direction::Outflow => -amount,
        }
    }
}

/// A validated money movement. Instances are only produced by the validator (with
/// `recorded_at == None`) or read back from the store. A persisted transaction is never
/// modified; corrections are new transactions.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Transaction {
    pub(crate) transaction_id: String,
    pub(crate) chat_id: ChatId,
    pub(crate) message_id: MessageId,
    pub(crate) direction: Direction,
    pub(crate) amount: Amount,
    pub(crate) description: String,
    pub(crate) category: String,
    pub(crate) occurred_on: NaiveDate,
    pub(crate) received_at: DateTime<Utc>,
    pub(crate) recorded_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub(crate) fn generate_id() -> String {
        format!("tx-{}", uuid::Uuid::new_v4())
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// The amount with inflows positive and outflows negative.
    pub fn signed_amount(&self) -> Decimal {
        self.direction.signed(self.amount.value())
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn occurred_on(&self) -> NaiveDate {
        self.occurred_on
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.recorded_at
    }

    pub fn idempotency_key(&self) -> String {
        idempotency_key(&self.chat_id, &self.message_id)
    }

    /// Sets `recorded_at`, at the millisecond precision the store keeps.
    pub(crate) fn stamped(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at.trunc_subsecs(3));
        self
    }

    pub fn to_row(&self) -> Row {
        Row::new()
            .with(TransactionColumn::TransactionId, &self.transaction_id)
            .with(TransactionColumn::ChatId, self.chat_id.as_str())
            .with(TransactionColumn::Direction, self.direction.to_string())
            .with(TransactionColumn::Amount, self.amount.to_string())
            .with(TransactionColumn::Description, &self.description)
            .with(TransactionColumn::Category, &self.category)
            .with(
                TransactionColumn::OccurredOn,
                self.occurred_on.format(DATE_FORMAT).to_string(),
            )
            .with(TransactionColumn::MessageId, self.message_id.as_str())
            .with(TransactionColumn::IdempotencyKey, self.idempotency_key())
            .with(TransactionColumn::ReceivedAt, timestamp(self.received_at))
            .with(
                TransactionColumn::RecordedAt,
                self.recorded_at.map(timestamp).unwrap_or_default(),
            )
    }

    /// Reads a transaction back from a stored row. Any missing or unparseable cell is an error:
    /// rows are only ever written by `to_row`, so a bad row means the store is corrupted.
    pub fn from_row(row: &Row) -> Result<Self> {
        let cell = |col: TransactionColumn| row.require(col);
        let transaction_id = cell(TransactionColumn::TransactionId)?.to_string();
        let direction = Direction::from_str(cell(TransactionColumn::Direction)?)
            .with_context(|| format!("Bad direction in transaction {transaction_id}"))?;
        let amount = Amount::from_str(cell(TransactionColumn::Amount)?)
            .with_context(|| format!("Bad amount in transaction {transaction_id}"))?;
        let occurred_on =
            NaiveDate::parse_from_str(cell(TransactionColumn::OccurredOn)?, DATE_FORMAT)
                .with_context(|| format!("Bad occurred_on in transaction {transaction_id}"))?;
        let received_at = parse_timestamp(cell(TransactionColumn::ReceivedAt)?)
            .with_context(|| format!("Bad received_at in transaction {transaction_id}"))?;
        let recorded_at = match row.get(&TransactionColumn::RecordedAt.to_string()) {
            None | Some("") => None,
            Some(s) => Some(
                parse_timestamp(s)
                    .with_context(|| format!("Bad recorded_at in transaction {transaction_id}"))?,
            ),
        };

        Ok(Self {
            chat_id: ChatId::from(cell(TransactionColumn::ChatId)?),
            message_id: MessageId::from(cell(TransactionColumn::MessageId)?),
            direction,
            amount,
            description: cell(TransactionColumn::Description)?.to_string(),
            category: cell(TransactionColumn::Category)?.to_string(),
            occurred_on,
            received_at,
            recorded_at,
            transaction_id,
        })
    }
}

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("'{s}' is not an RFC 3339 timestamp"))?
        .with_timezone(&Utc))
}

/// The columns of the `movimentos` table.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionColumn {
    TransactionId,
    ChatId,
    Direction,
    Amount,
    Description,
    Category,
    OccurredOn,
    MessageId,
    IdempotencyKey,
    ReceivedAt,
    RecordedAt,
}

serde_plain::derive_display_from_serialize!(TransactionColumn);
serde_plain::derive_fromstr_from_deserialize!(TransactionColumn);

impl TransactionColumn {
    pub const ALL: [TransactionColumn; 11] = [
        TransactionColumn::TransactionId,
        TransactionColumn::ChatId,
        TransactionColumn::Direction,
        TransactionColumn::Amount,
        TransactionColumn::Description,
        TransactionColumn::Category,
        TransactionColumn::OccurredOn,
        TransactionColumn::MessageId,
        TransactionColumn::IdempotencyKey,
        TransactionColumn::ReceivedAt,
        TransactionColumn::RecordedAt,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Transaction {
        Transaction {
            transaction_id: "tx-1".to_string(),
            chat_id: ChatId::from("42"),
            message_id: MessageId::from("7"),
            direction: Direction::Outflow,
            amount: Amount::from_str("35,90").unwrap(),
            description: "frete".to_string(),
            category: "transporte".to_string(),
            occurred_on: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            received_at: Utc.with_ymd_and_hms(2024, 3, 10, 15, 0, 0).unwrap(),
            recorded_at: None,
        }
    }

    #[test]
    fn test_direction_names() {
        assert_eq!(Direction::Inflow.to_string(), "entrada");
        assert_eq!(Direction::from_str("saida").unwrap(), Direction::Outflow);
        assert!(Direction::from_str("Saida").is_err());
    }

    #[test]
    fn test_row_round_trip_with_and_without_recorded_at() {
        let tx = sample();
        let row = tx.to_row();
        assert_eq!(row.get("idempotency_key"), Some("42:7"));
        assert_eq!(row.get("recorded_at"), Some(""));
        assert_eq!(Transaction::from_row(&row).unwrap(), tx);

        let stamped = tx.stamped(Utc.with_ymd_and_hms(2024, 3, 10, 15, 0, 1).unwrap());
        assert_eq!(Transaction::from_row(&stamped.to_row()).unwrap(), stamped);
    }

    #[test]
    fn test_corrupted_row_is_an_error() {
        let mut row = sample().to_row();
        row.set(TransactionColumn::Amount, "lots");
        let err = Transaction::from_row(&row).unwrap_err();
        assert!(format!("{err:#}").contains("Bad amount in transaction tx-1"));
    }

    #[test]
    fn test_signed_amount() {
        let tx = sample();
        assert_eq!(tx.signed_amount(), Decimal::from_str("-35.90").unwrap());
    }
}
