//! One message in, one outcome out: rate limiter, extractor, validator, ledger.

use crate::extract::IntentExtractor;
use crate::ledger::{LedgerWriter, RecordResult};
use crate::model::{IncomingMessage, Transaction};
use crate::normalize::local_date;
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::rejection::Rejection;
use crate::validate::validate;
use crate::Result;
use chrono::FixedOffset;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to a message. Expected failures are `Rejected`; an `Err` from
/// [`Pipeline::process`] means something is broken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Recorded {
        transaction: Transaction,
        /// The message had been recorded before and this is the stored transaction.
        duplicate: bool,
    },
    Rejected {
        rejection: Rejection,
    },
}

impl Outcome {
    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            Outcome::Recorded { transaction, .. } => Some(transaction),
            Outcome::Rejected { .. } => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Recorded { .. } => None,
            Outcome::Rejected { rejection } => Some(rejection),
        }
    }
}

impl From<Rejection> for Outcome {
    fn from(rejection: Rejection) -> Self {
        Outcome::Rejected { rejection }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    limiter: Arc<dyn RateLimiter>,
    extractor: IntentExtractor,
    ledger: LedgerWriter,
    offset: FixedOffset,
}

impl Pipeline {
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        extractor: IntentExtractor,
        ledger: LedgerWriter,
        offset: FixedOffset,
    ) -> Self {
        Self {
            limiter,
            extractor,
            ledger,
            offset,
        }
    }

    pub fn ledger(&self) -> &LedgerWriter {
        &self.ledger
    }

    pub async fn process(&self, message: &IncomingMessage) -> Result<Outcome> {
        let chat_id = &message.chat_id;
        match self.limiter.acquire(chat_id, message.received_at) {
            RateDecision::Allowed => {}
            RateDecision::Limited { retry_after } => {
                info!(chat_id = %chat_id, "Rate limited for {}ms", retry_after.as_millis());
                let retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                return Ok(Rejection::RateLimited { retry_after_ms }.into());
            }
        }

        // A redelivered message is answered from the ledger without asking the NLU again.
        match self.ledger.lookup(chat_id, &message.message_id).await {
            Ok(Some(transaction)) => {
                debug!(chat_id = %chat_id, message_id = %message.message_id, "Redelivery");
                return Ok(Outcome::Recorded {
                    transaction,
                    duplicate: true,
                });
            }
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                warn!("Skipping the redelivery check for {chat_id}: {e}");
            }
            Err(e) => return Err(e.into()),
        }

        let candidate = match self.extractor.extract(message).await {
            Ok(candidate) => candidate,
            Err(rejection) => return Ok(self.rejected(message, rejection)),
        };
        let reference = local_date(message.received_at, self.offset);
        let transaction = match validate(candidate, reference) {
            Ok(transaction) => transaction,
            Err(rejection) => return Ok(self.rejected(message, rejection)),
        };

        Ok(match self.ledger.record(transaction).await? {
            RecordResult::Recorded(transaction) => Outcome::Recorded {
                transaction,
                duplicate: false,
            },
            RecordResult::AlreadyRecorded(transaction) => Outcome::Recorded {
                transaction,
                duplicate: true,
            },
            RecordResult::PersistenceFailed { .. } => {
                self.rejected(message, Rejection::PersistenceFailed)
            }
        })
    }

    fn rejected(&self, message: &IncomingMessage, rejection: Rejection) -> Outcome {
        info!(
            chat_id = %message.chat_id,
            message_id = %message.message_id,
            kind = rejection.code(),
            "Rejected message"
        );
        rejection.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Direction;
    use crate::nlu::ScriptedNlu;
    use crate::rate_limit::{Unlimited, WindowRateLimiter};
    use crate::retry::RetryPolicy;
    use crate::store::{MemoryStore, Table};
    use chrono::{NaiveDate, TimeDelta, TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    struct Fixture {
        nlu: Arc<ScriptedNlu>,
        store: Arc<MemoryStore>,
        pipeline: Pipeline,
    }

    fn fixture(limiter: Arc<dyn RateLimiter>, store: MemoryStore) -> Fixture {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        let nlu = Arc::new(ScriptedNlu::default());
        let store = Arc::new(store);
        let extractor =
            IntentExtractor::new(nlu.clone(), offset).with_retry(RetryPolicy::immediate(2));
        let ledger = LedgerWriter::new(store.clone()).with_retry(RetryPolicy::immediate(3));
        Fixture {
            nlu,
            store,
            pipeline: Pipeline::new(limiter, extractor, ledger, offset),
        }
    }

    fn unlimited() -> Fixture {
        fixture(Arc::new(Unlimited), MemoryStore::new())
    }

    fn message(id: &str, text: &str) -> IncomingMessage {
        IncomingMessage::new(
            "42",
            id,
            text,
            Utc.with_ymd_and_hms(2024, 3, 10, 15, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_entrada_command_end_to_end() {
        let f = unlimited();
        let outcome = f
            .pipeline
            .process(&message("1", "/entrada 150 venda produto"))
            .await
            .unwrap();
        let Outcome::Recorded {
            transaction,
            duplicate,
        } = outcome
        else {
            panic!("expected a recorded transaction");
        };
        assert!(!duplicate);
        assert_eq!(transaction.direction(), Direction::Inflow);
        assert_eq!(transaction.amount().value(), Decimal::from_str("150.00").unwrap());
        assert_eq!(transaction.description(), "venda produto");
        assert_eq!(transaction.category(), "outros");
        assert_eq!(
            transaction.occurred_on(),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
        );
        assert!(transaction.recorded_at().is_some());
        assert_eq!(f.store.rows(Table::Movimentos).len(), 1);
        assert_eq!(f.nlu.calls(), 0);
    }

    #[tokio::test]
    async fn test_free_text_end_to_end() {
        let f = unlimited();
        let outcome = f
            .pipeline
            .process(&message("2", "paguei 35,90 de frete hoje"))
            .await
            .unwrap();
        let transaction = outcome.transaction().unwrap();
        assert_eq!(transaction.direction(), Direction::Outflow);
        assert_eq!(transaction.amount().value(), Decimal::from_str("35.90").unwrap());
        assert_eq!(transaction.description(), "frete");
        assert_eq!(transaction.category(), "transporte");
        assert_eq!(
            transaction.occurred_on(),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
        );
        assert_eq!(f.nlu.calls(), 1);
    }

    #[tokio::test]
    async fn test_relative_dates_use_local_receipt_day() {
        let f = unlimited();
        // 01:30 UTC on the 1st is still the last day of February in São Paulo.
        let mut msg = message("3", "almocei ontem 42 reais");
        msg.received_at = Utc.with_ymd_and_hms(2024, 3, 1, 1, 30, 0).unwrap();
        let outcome = f.pipeline.process(&msg).await.unwrap();
        assert_eq!(
            outcome.transaction().unwrap().occurred_on(),
            NaiveDate::from_ymd_opt(2024, 2, 28).unwrap()
        );
    }

    #[tokio::test]
    async fn test_same_message_twice_records_once() {
        let f = unlimited();
        let msg = message("4", "paguei 35,90 de frete hoje");
        let first = f.pipeline.process(&msg).await.unwrap();
        let second = f.pipeline.process(&msg).await.unwrap();

        assert_eq!(f.store.rows(Table::Movimentos).len(), 1);
        assert_eq!(first.transaction(), second.transaction());
        assert!(matches!(second, Outcome::Recorded { duplicate: true, .. }));
        // The redelivery is answered from the ledger.
        assert_eq!(f.nlu.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_without_nlu_call() {
        let f = fixture(Arc::new(WindowRateLimiter::default()), MemoryStore::new());
        let base = Utc.with_ymd_and_hms(2024, 3, 10, 15, 0, 0).unwrap();
        let mut outcomes = Vec::new();
        for (i, ms) in [0, 100, 200].into_iter().enumerate() {
            let mut msg = message(&i.to_string(), "paguei 35,90 de frete hoje");
            msg.received_at = base + TimeDelta::milliseconds(ms);
            outcomes.push(f.pipeline.process(&msg).await.unwrap());
        }
        assert_eq!(
            outcomes[2].rejection(),
            Some(&Rejection::RateLimited {
                retry_after_ms: 800
            })
        );
        assert_eq!(f.nlu.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_messages_share_one_window() {
        let f = fixture(Arc::new(WindowRateLimiter::default()), MemoryStore::new());
        let pipeline = Arc::new(f.pipeline);
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..6 {
            let pipeline = pipeline.clone();
            let _ = tasks.spawn(async move {
                let msg = message(&format!("c{i}"), "/saida 10 café");
                pipeline.process(&msg).await.unwrap()
            });
        }
        let mut limited = 0;
        while let Some(outcome) = tasks.join_next().await {
            if matches!(
                outcome.unwrap().rejection(),
                Some(Rejection::RateLimited { .. })
            ) {
                limited += 1;
            }
        }
        assert_eq!(limited, 4);
        assert_eq!(f.store.rows(Table::Movimentos).len(), 2);
    }

    #[tokio::test]
    async fn test_rejections_are_outcomes() {
        let f = unlimited();
        let outcome = f
            .pipeline
            .process(&message("5", "/saida 0 nada"))
            .await
            .unwrap();
        assert_eq!(outcome.rejection(), Some(&Rejection::InvalidAmount));

        let outcome = f
            .pipeline
            .process(&message("6", "mensagem desconhecida"))
            .await
            .unwrap();
        assert_eq!(outcome.rejection(), Some(&Rejection::InvalidAmount));
        assert!(f.store.rows(Table::Movimentos).is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_then_resend() {
        let f = fixture(Arc::new(Unlimited), MemoryStore::new().failing_appends(4));
        let msg = message("7", "/saida 12 estacionamento");
        let outcome = f.pipeline.process(&msg).await.unwrap();
        assert_eq!(outcome.rejection(), Some(&Rejection::PersistenceFailed));

        let outcome = f.pipeline.process(&msg).await.unwrap();
        assert!(matches!(outcome, Outcome::Recorded { duplicate: false, .. }));
        assert_eq!(f.store.rows(Table::Movimentos).len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_store_error_is_err() {
        let f = fixture(Arc::new(Unlimited), MemoryStore::new().corrupted());
        assert!(f
            .pipeline
            .process(&message("8", "/saida 12 estacionamento"))
            .await
            .is_err());
    }

    #[test]
    fn test_outcome_json() {
        let json = serde_json::to_value(Outcome::from(Rejection::RateLimited {
            retry_after_ms: 300,
        }))
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "rejected",
                "rejection": {"kind": "RATE_LIMITED", "retry_after_ms": 300}
            })
        );
    }

}
