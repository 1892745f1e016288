//! The JSON-lines transport: one `IncomingMessage` per input line, one `Reply` per output line.

use crate::commands::{Bot, Out, Reply};
use crate::model::IncomingMessage;
use crate::{Config, Mode, Result};
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServeSummary {
    /// Lines that parsed as messages.
    pub received: usize,
    /// Lines that did not.
    pub malformed: usize,
    pub replies: usize,
}

/// Reads messages from stdin until it closes, writing replies to stdout.
pub async fn serve(config: Config, mode: Mode) -> Result<Out<ServeSummary>> {
    let bot = Arc::new(Bot::from_config(&config, mode).await?);
    info!("Reading messages from stdin");
    let summary = serve_lines(bot, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    Ok(Out::new(
        format!(
            "Handled {} messages and sent {} replies",
            summary.received, summary.replies
        ),
        summary,
    ))
}

/// Handles every line of `input` as its own task. Replies are written in completion order, which
/// may differ from arrival order.
pub async fn serve_lines<R, W>(bot: Arc<Bot>, input: R, mut output: W) -> Result<ServeSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Reply>();
    let mut tasks = JoinSet::new();
    let mut lines = input.lines();
    let mut summary = ServeSummary::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Unable to read from the input")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let message: IncomingMessage = match serde_json::from_str(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Skipping a line that is not a message: {e}");
                        summary.malformed += 1;
                        continue;
                    }
                };
                summary.received += 1;
                let bot = bot.clone();
                let tx = tx.clone();
                let _ = tasks.spawn(async move {
                    if let Some(reply) = bot.handle(&message).await {
                        let _ = tx.send(reply);
                    }
                });
            }
            Some(reply) = rx.recv() => {
                write_reply(&mut output, &reply).await?;
                summary.replies += 1;
            }
            Some(joined) = tasks.join_next() => {
                if let Err(e) = joined {
                    error!("A message task failed: {e}");
                }
            }
        }
    }

    drop(tx);
    while let Some(reply) = rx.recv().await {
        write_reply(&mut output, &reply).await?;
        summary.replies += 1;
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("A message task failed: {e}");
        }
    }
    output.flush().await.context("Unable to flush the output")?;
    Ok(summary)
}

async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, reply: &Reply) -> Result<()> {
    let mut line = serde_json::to_string(reply).context("Unable to serialize a reply")?;
    line.push('\n');
    output
        .write_all(line.as_bytes())
        .await
        .context("Unable to write a reply")?;
    output.flush().await.context("Unable to flush the output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;
    use serde_json::Value;

    #[tokio::test]
    async fn test_serve_lines() {
        let env = TestEnv::new().await;
        let bot = Arc::new(env.bot().await);
        let input = concat!(
            r#"{"chat_id": 42, "message_id": 1, "text": "/entrada 150 venda produto", "received_at": "2024-03-10T15:00:00Z"}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"chat_id": "42", "message_id": "2", "text": "???", "received_at": "2024-03-10T15:00:01Z"}"#,
            "\n",
            r#"{"chat_id": "43", "message_id": "1", "text": "/help"}"#,
            "\n",
        );
        let mut output = Vec::new();
        let summary = serve_lines(bot, input.as_bytes(), &mut output).await.unwrap();
        assert_eq!(
            summary,
            ServeSummary {
                received: 3,
                malformed: 1,
                replies: 2,
            }
        );

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        let recorded = replies
            .iter()
            .find(|r| r["chat_id"] == "42")
            .unwrap();
        assert_eq!(recorded["message_id"], "1");
        assert_eq!(recorded["outcome"]["status"], "recorded");
        assert_eq!(recorded["outcome"]["transaction"]["amount"], "150.00");
        assert_eq!(env.transaction_count("42").await, 1);
    }
}
