//! The remote natural-language collaborator that turns a free-form sentence into a structured
//! suggestion. Answers are untrusted: every field is optional and goes back through the
//! normalizer before anything is believed.

mod openai;
mod scripted;

pub use openai::{OpenAiNlu, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use scripted::ScriptedNlu;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Extracts a transaction suggestion from free text.
#[async_trait]
pub trait Nlu: Send + Sync {
    /// A short name for logs.
    fn name(&self) -> &str;

    async fn suggest(&self, text: &str) -> Result<Suggestion, NluError>;

    /// Checks that the service is reachable and the credentials are accepted.
    async fn health(&self) -> Result<(), NluError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NluError {
    #[error("the request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// An amount as the service sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawAmount {
    Number(Decimal),
    Text(String),
}

/// What the service believes the message says. `None` means the field was absent or had the
/// wrong type.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Suggestion {
    pub direction: Option<String>,
    pub amount: Option<RawAmount>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub date: Option<String>,
    pub confidence: Option<f64>,
}

impl Suggestion {
    /// Reads a suggestion from the JSON object the service produced. Only a non-object is an
    /// error; individual fields of the wrong type are dropped.
    pub fn from_json(value: &Value) -> Result<Self, NluError> {
        let obj = value
            .as_object()
            .ok_or_else(|| NluError::Malformed(format!("expected a JSON object, got {value}")))?;

        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        };

        let amount = ["valor", "amount"]
            .iter()
            .find_map(|k| obj.get(*k))
            .and_then(|v| match v {
                Value::Number(n) => decimal_from_number(n).map(RawAmount::Number),
                Value::String(s) => Some(RawAmount::Text(s.clone())),
                _ => None,
            });

        let confidence = ["confianca", "confidence"]
            .iter()
            .find_map(|k| obj.get(*k))
            .and_then(Value::as_f64);

        Ok(Self {
            direction: text(&["tipo", "direction"]),
            amount,
            description: text(&["descricao", "description"]),
            category: text(&["categoria", "category"]),
            date: text(&["data", "date"]),
            confidence,
        })
    }
}

fn decimal_from_number(n: &serde_json::Number) -> Option<Decimal> {
    let s = n.to_string();
    Decimal::from_str(&s)
        .or_else(|_| Decimal::from_scientific(&s))
        .ok()
}
