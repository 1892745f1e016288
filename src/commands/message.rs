use crate::commands::{Bot, Out, Reply};
use crate::model::IncomingMessage;
use crate::{Config, Mode, Result};

/// Runs a single message through the bot, exactly as the `serve` transport would.
pub async fn message(config: Config, mode: Mode, message: IncomingMessage) -> Result<Out<Reply>> {
    let bot = Bot::from_config(&config, mode).await?;
    Ok(match bot.handle(&message).await {
        Some(reply) => Out::new(reply.text.clone(), reply),
        None => "The message was ignored".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Outcome;
    use crate::test::TestEnv;
    use chrono::Utc;

    #[tokio::test]
    async fn test_message_is_recorded_in_sqlite() {
        let env = TestEnv::new().await;
        let msg = IncomingMessage::new("42", "1", "/saida 12,50 estacionamento", Utc::now());
        let out = message(env.config(), Mode::Test, msg.clone()).await.unwrap();
        let reply = out.structure().unwrap();
        assert!(matches!(
            reply.outcome,
            Some(Outcome::Recorded {
                duplicate: false,
                ..
            })
        ));

        // A second process sees the same ledger and answers the redelivery from it.
        let again = message(env.config(), Mode::Test, msg).await.unwrap();
        assert!(matches!(
            again.structure().unwrap().outcome,
            Some(Outcome::Recorded {
                duplicate: true,
                ..
            })
        ));
        assert_eq!(env.transaction_count("42").await, 1);
    }

    #[tokio::test]
    async fn test_ignored_message() {
        let env = TestEnv::new().await;
        let msg = IncomingMessage::new("42", "1", "...", Utc::now());
        let out = message(env.config(), Mode::Test, msg).await.unwrap();
        assert!(out.structure().is_none());
    }
}
