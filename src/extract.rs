//! Turns a chat message into an unvalidated `Candidate`, either by parsing a `/entrada` or
//! `/saida` command or by asking the NLU collaborator.

use crate::model::{Amount, Candidate, Direction, IncomingMessage};
use crate::nlu::{Nlu, NluError, RawAmount, Suggestion};
use crate::normalize::{
    clean_text, local_date, normalize_category, parse_amount, parse_direction, resolve_date,
    FALLBACK_CATEGORY,
};
use crate::rejection::Rejection;
use crate::retry::{self, RetryError, RetryPolicy};
use chrono::{FixedOffset, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_NLU_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

/// Currency markers that users sometimes type as a separate token before the number.
const DETACHED_CURRENCY: &[&str] = &["r$", "$", "brl"];

/// A slash command split into its lower-cased name (without any `@botname` suffix) and the
/// remaining text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashCommand<'a> {
    pub name: &'a str,
    pub args: &'a str,
}

impl<'a> SlashCommand<'a> {
    /// Returns `None` when `text` does not start with `/`.
    pub fn parse(text: &'a str) -> Option<Self> {
        let text = text.trim_start();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.find(char::is_whitespace) {
            Some(ix) => (&rest[..ix], rest[ix..].trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or(head);
        Some(Self { name, args })
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

#[derive(Clone)]
pub struct IntentExtractor {
    nlu: Arc<dyn Nlu>,
    retry: RetryPolicy,
    timeout: Duration,
    min_confidence: f64,
    offset: FixedOffset,
}

impl IntentExtractor {
    pub fn new(nlu: Arc<dyn Nlu>, offset: FixedOffset) -> Self {
        Self {
            nlu,
            retry: RetryPolicy::nlu_default(),
            timeout: DEFAULT_NLU_TIMEOUT,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            offset,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub async fn extract(&self, message: &IncomingMessage) -> Result<Candidate, Rejection> {
        let reference = local_date(message.received_at, self.offset);
        match SlashCommand::parse(&message.text) {
            Some(command) => Self::from_command(message, command, reference),
            None => self.from_free_text(message, reference).await,
        }
    }

    fn from_command(
        message: &IncomingMessage,
        command: SlashCommand<'_>,
        reference: NaiveDate,
    ) -> Result<Candidate, Rejection> {
        let direction = if command.is("entrada") {
            Direction::Inflow
        } else if command.is("saida") {
            Direction::Outflow
        } else {
            debug!("Unknown command /{} cannot describe a transaction", command.name);
            return Err(Rejection::MalformedCommand);
        };

        let mut tokens = command.args.split_whitespace();
        let mut amount_text = tokens
            .next()
            .ok_or(Rejection::MalformedCommand)?
            .to_string();
        if DETACHED_CURRENCY.contains(&amount_text.to_lowercase().as_str()) {
            if let Some(number) = tokens.next() {
                amount_text.push_str(number);
            }
        }
        let description = clean_text(&tokens.collect::<Vec<_>>().join(" "));
        if description.is_empty() {
            return Err(Rejection::MalformedCommand);
        }

        Ok(Candidate {
            chat_id: message.chat_id.clone(),
            message_id: message.message_id.clone(),
            received_at: message.received_at,
            direction: Some(direction),
            amount: parse_amount(&amount_text),
            occurred_on: Ok(reference),
            description,
            category: FALLBACK_CATEGORY.to_string(),
        })
    }

    async fn from_free_text(
        &self,
        message: &IncomingMessage,
        reference: NaiveDate,
    ) -> Result<Candidate, Rejection> {
        let text = clean_text(&message.text);
        if text.is_empty() {
            return Err(Rejection::EmptyDescription);
        }

        let suggestion = self.suggest(&text).await?;
        debug!(chat_id = %message.chat_id, "NLU suggestion: {suggestion:?}");
        Ok(self.candidate_from(message, suggestion, reference))
    }

    /// Asks the NLU, bounding each attempt by the timeout and retrying any failure.
    async fn suggest(&self, text: &str) -> Result<Suggestion, Rejection> {
        let nlu = &self.nlu;
        let timeout = self.timeout;
        let result = retry::run(&self.retry, nlu.name(), |_: &NluError| true, move || async move {
            match tokio::time::timeout(timeout, nlu.suggest(text)).await {
                Ok(result) => result,
                Err(_) => Err(NluError::Timeout),
            }
        })
        .await;

        match result {
            Ok(suggestion) => Ok(suggestion),
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!("NLU unavailable after {attempts} attempts: {last}");
                Err(Rejection::ExtractionUnavailable)
            }
            Err(RetryError::Permanent(e)) => {
                warn!("NLU failed: {e}");
                Err(Rejection::ExtractionUnavailable)
            }
        }
    }

    /// Runs every suggested field back through the normalizer. Missing fields stay unresolved.
    fn candidate_from(
        &self,
        message: &IncomingMessage,
        suggestion: Suggestion,
        reference: NaiveDate,
    ) -> Candidate {
        let mut direction = suggestion.direction.as_deref().and_then(parse_direction);
        if let Some(confidence) = suggestion.confidence {
            if confidence < self.min_confidence {
                info!(
                    chat_id = %message.chat_id,
                    confidence,
                    min_confidence = self.min_confidence,
                    "Low-confidence direction discarded"
                );
                direction = None;
            }
        }

        let amount = match suggestion.amount {
            None => Err(Rejection::InvalidAmount),
            // Numbers with more than two fractional digits are rejected, like their text form.
            Some(RawAmount::Number(value)) if value.normalize().scale() > 2 => {
                Err(Rejection::InvalidAmount)
            }
            Some(RawAmount::Number(value)) => {
                Amount::new(value).map_err(|_| Rejection::InvalidAmount)
            }
            Some(RawAmount::Text(text)) => parse_amount(&text),
        };

        let occurred_on = match suggestion.date.as_deref() {
            None => Err(Rejection::InvalidDate),
            Some(text) => resolve_date(text, reference),
        };

        Candidate {
            chat_id: message.chat_id.clone(),
            message_id: message.message_id.clone(),
            received_at: message.received_at,
            direction,
            amount,
            occurred_on,
            description: suggestion
                .description
                .as_deref()
                .map(clean_text)
                .unwrap_or_default(),
            category: normalize_category(suggestion.category.as_deref().unwrap_or_default()),
        }
    }
}
