use crate::nlu::{Nlu, NluError, RawAmount, Suggestion};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// An `Nlu` that answers from a fixed table, keyed by the lower-cased message. It is used in
/// tests and whenever the program runs in test mode, so nothing reaches the network.
///
/// Messages missing from the table get an empty suggestion, which the validator rejects.
#[derive(Debug)]
pub struct ScriptedNlu {
    answers: HashMap<String, Suggestion>,
    failures_left: AtomicUsize,
    always_fail: bool,
    calls: AtomicUsize,
}

impl Default for ScriptedNlu {
    fn default() -> Self {
        Self::empty()
            .with(
                "paguei 35,90 de frete hoje",
                Suggestion {
                    amount: Some(RawAmount::Text("35,90".to_string())),
                    date: Some("hoje".to_string()),
                    ..suggestion("saida", 3590, "frete", "transporte", "today")
                },
            )
            .with(
                "entrou 500 pix do carlos",
                suggestion("entrada", 50000, "pix Carlos", "transferência", "today"),
            )
            .with(
                "comprei combustível 89,50",
                suggestion("saida", 8950, "combustível", "transporte", "today"),
            )
            .with(
                "almocei ontem 42 reais",
                suggestion("saida", 4200, "almoço", "alimentação", "yesterday"),
            )
    }
}

fn suggestion(
    direction: &str,
    cents: i64,
    description: &str,
    category: &str,
    date: &str,
) -> Suggestion {
    Suggestion {
        direction: Some(direction.to_string()),
        amount: Some(RawAmount::Number(Decimal::new(cents, 2))),
        description: Some(description.to_string()),
        category: Some(category.to_string()),
        date: Some(date.to_string()),
        confidence: Some(0.95),
    }
}

impl ScriptedNlu {
    /// A scripted NLU with no canned answers.
    pub fn empty() -> Self {
        Self {
            answers: HashMap::new(),
            failures_left: AtomicUsize::new(0),
            always_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// An NLU whose every call fails as if the service were down.
    pub fn unavailable() -> Self {
        Self {
            always_fail: true,
            ..Self::empty()
        }
    }

    pub fn with(mut self, text: &str, suggestion: Suggestion) -> Self {
        let _ = self.answers.insert(text.to_lowercase(), suggestion);
        self
    }

    /// Makes the next `n` calls fail with a transport error.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// How many times `suggest` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Nlu for ScriptedNlu {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn suggest(&self, text: &str) -> Result<Suggestion, NluError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(NluError::Transport("scripted outage".to_string()));
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(NluError::Transport("scripted failure".to_string()));
        }
        Ok(self
            .answers
            .get(&text.trim().to_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn health(&self) -> Result<(), NluError> {
        if self.always_fail {
            return Err(NluError::Transport("scripted outage".to_string()));
        }
        Ok(())
    }
}
