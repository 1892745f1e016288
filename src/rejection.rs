//! Typed reasons for not recording a message as a transaction.

use serde::{Deserialize, Serialize};

/// Why a message did not become a transaction. None of these are program errors: each one is an
/// expected outcome that is reported back to the person who sent the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rejection {
    /// A slash command was missing its amount or description.
    #[error("the command is missing its amount or description")]
    MalformedCommand,
    #[error("the amount is missing, not a number, or not greater than zero")]
    InvalidAmount,
    #[error("the date could not be resolved or is in the future")]
    InvalidDate,
    #[error("could not tell whether money came in or went out")]
    AmbiguousDirection,
    #[error("the description is empty")]
    EmptyDescription,
    /// The NLU service could not be reached after all retries.
    #[error("the language service is unavailable")]
    ExtractionUnavailable,
    #[error("too many messages, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    /// The store kept failing. Resending the same message is safe.
    #[error("the transaction could not be saved")]
    PersistenceFailed,
}

impl Rejection {
    /// The stable machine-readable name, e.g. `INVALID_AMOUNT`.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::MalformedCommand => "MALFORMED_COMMAND",
            Rejection::InvalidAmount => "INVALID_AMOUNT",
            Rejection::InvalidDate => "INVALID_DATE",
            Rejection::AmbiguousDirection => "AMBIGUOUS_DIRECTION",
            Rejection::EmptyDescription => "EMPTY_DESCRIPTION",
            Rejection::ExtractionUnavailable => "EXTRACTION_UNAVAILABLE",
            Rejection::RateLimited { .. } => "RATE_LIMITED",
            Rejection::PersistenceFailed => "PERSISTENCE_FAILED",
        }
    }

    /// A short reply for the chat user.
    pub fn user_message(&self) -> String {
        match self {
            Rejection::MalformedCommand => {
                "Formato inválido. Use /entrada <valor> <descrição> ou /saida <valor> <descrição>."
                    .to_string()
            }
            Rejection::InvalidAmount => {
                "Valor inválido. Informe um número maior que zero, ex: 35,90.".to_string()
            }
            Rejection::InvalidDate => {
                "Data inválida. Use hoje, ontem ou DD/MM/AAAA, sem datas futuras.".to_string()
            }
            Rejection::AmbiguousDirection => {
                "Não entendi se foi uma entrada ou uma saída. Tente /entrada ou /saida.".to_string()
            }
            Rejection::EmptyDescription => "A descrição não pode ficar vazia.".to_string(),
            Rejection::ExtractionUnavailable => {
                "Não consegui interpretar a mensagem agora. Tente novamente em instantes."
                    .to_string()
            }
            Rejection::RateLimited { retry_after_ms } => format!(
                "Muitas mensagens. Aguarde {:.1}s e tente novamente.",
                *retry_after_ms as f64 / 1000.0
            ),
            Rejection::PersistenceFailed => {
                "Não consegui salvar agora. Reenvie a mensagem, ela não será duplicada.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_kind_matches_code() {
        let all = [
            Rejection::MalformedCommand,
            Rejection::InvalidAmount,
            Rejection::InvalidDate,
            Rejection::AmbiguousDirection,
            Rejection::EmptyDescription,
            Rejection::ExtractionUnavailable,
            Rejection::RateLimited {
                retry_after_ms: 250,
            },
            Rejection::PersistenceFailed,
        ];
        let mut messages = std::collections::HashSet::new();
        for rejection in all {
            let value = serde_json::to_value(&rejection).unwrap();
            assert_eq!(value["kind"], rejection.code());
            assert!(messages.insert(rejection.user_message()));
        }
    }

    #[test]
    fn test_rate_limited_carries_hint() {
        let json = serde_json::to_string(&Rejection::RateLimited {
            retry_after_ms: 1500,
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"RATE_LIMITED","retry_after_ms":1500}"#);
        let back: Rejection = serde_json::from_str(&json).unwrap();
        assert!(back.user_message().contains("1.5s"));
    }
}
