use crate::aggregate::{Aggregator, MonthlyReport, OverallBalance};
use crate::commands::{nlu_for, open_store};
use crate::extract::{IntentExtractor, SlashCommand};
use crate::ledger::LedgerWriter;
use crate::model::{format_brl, ChatId, Direction, IncomingMessage, MessageId, Month, User};
use crate::nlu::Nlu;
use crate::normalize::local_date;
use crate::pipeline::{Outcome, Pipeline};
use crate::rate_limit::WindowRateLimiter;
use crate::rejection::Rejection;
use crate::store::Store;
use crate::users::UserRegistry;
use crate::{Config, Mode, Result};
use chrono::FixedOffset;
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Longer messages are ignored without a reply.
pub const MAX_MESSAGE_CHARS: usize = 4000;

const GENERIC_FAILURE: &str = "Algo deu errado do nosso lado. Tente novamente mais tarde.";

const HELP: &str = "Registre movimentos escrevendo naturalmente, ex: \"paguei 35,90 de frete hoje\".

Comandos:
/entrada <valor> <descrição> registra uma entrada
/saida <valor> <descrição> registra uma saída
/saldo mostra o saldo total e o do mês
/relatorio [AAAA-MM] mostra o relatório do mês por categoria
/help mostra esta ajuda";

const REPORT_USAGE: &str = "Use /relatorio, /relatorio 2024-03 ou /relatorio 03/2024.";

/// The answer to one chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
    /// Present when the message went through the transaction pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl Reply {
    fn text(message: &IncomingMessage, text: impl Into<String>) -> Self {
        Self {
            chat_id: message.chat_id.clone(),
            message_id: message.message_id.clone(),
            text: text.into(),
            outcome: None,
        }
    }

    fn outcome(message: &IncomingMessage, outcome: Outcome) -> Self {
        Self {
            outcome: Some(outcome.clone()),
            ..Self::text(message, outcome_text(&outcome))
        }
    }
}

/// Routes chat messages: bot commands are answered here, everything else goes through the
/// transaction pipeline.
#[derive(Clone)]
pub struct Bot {
    pipeline: Pipeline,
    aggregator: Aggregator,
    users: UserRegistry,
    offset: FixedOffset,
}

impl Bot {
    pub fn new(
        pipeline: Pipeline,
        aggregator: Aggregator,
        users: UserRegistry,
        offset: FixedOffset,
    ) -> Self {
        Self {
            pipeline,
            aggregator,
            users,
            offset,
        }
    }

    /// Wires every component from `config` around the given collaborators.
    pub fn assemble(config: &Config, store: Arc<dyn Store>, nlu: Arc<dyn Nlu>) -> Result<Self> {
        let offset = config.utc_offset()?;
        let limiter = Arc::new(WindowRateLimiter::new(
            config.rate_limit_max_requests(),
            config.rate_limit_window(),
        ));
        let extractor = IntentExtractor::new(nlu, offset)
            .with_timeout(config.nlu_timeout())
            .with_min_confidence(config.min_confidence());
        let ledger = LedgerWriter::new(store.clone()).with_timeout(config.store_timeout());
        Ok(Self::new(
            Pipeline::new(limiter, extractor, ledger, offset),
            Aggregator::new(store.clone()),
            UserRegistry::new(store),
            offset,
        ))
    }

    /// Validates `config`, opens the ledger and picks the NLU for `mode`.
    pub async fn from_config(config: &Config, mode: Mode) -> Result<Self> {
        config.validate(mode)?;
        let store = Arc::new(open_store(config).await?);
        Self::assemble(config, store, nlu_for(config, mode)?)
    }

    /// Returns `None` for messages that are ignored. Unexpected failures are logged and answered
    /// with a generic apology, so one bad message never affects another.
    pub async fn handle(&self, message: &IncomingMessage) -> Option<Reply> {
        if !is_actionable(&message.text) {
            debug!(
                chat_id = %message.chat_id,
                message_id = %message.message_id,
                "Ignoring message"
            );
            return None;
        }
        match self.route(message).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                error!(
                    chat_id = %message.chat_id,
                    message_id = %message.message_id,
                    "Failed to handle message: {e:#}"
                );
                Some(Reply::text(message, GENERIC_FAILURE))
            }
        }
    }

    async fn route(&self, message: &IncomingMessage) -> Result<Reply> {
        let chat_id = &message.chat_id;
        let today = local_date(message.received_at, self.offset);

        if let Some(command) = SlashCommand::parse(&message.text) {
            if command.is("start") {
                let user = self.register(message).await?;
                return Ok(Reply::text(message, greeting(&user)));
            }
            if command.is("help") || command.is("ajuda") {
                return Ok(Reply::text(message, HELP));
            }
            if command.is("saldo") {
                let overall = self
                    .aggregator
                    .overall_balance(chat_id, Month::containing(today))
                    .await?;
                return Ok(Reply::text(message, balance_text(&overall)));
            }
            if command.is("relatorio") {
                let month = match Month::parse_or_current(command.args, today) {
                    Ok(month) => month,
                    Err(e) => {
                        debug!("Bad report month: {e}");
                        return Ok(Reply::text(message, REPORT_USAGE));
                    }
                };
                let report = self.aggregator.monthly_report(chat_id, month).await?;
                return Ok(Reply::text(message, report_text(&report)));
            }
        }

        let outcome = self.pipeline.process(message).await?;
        if !matches!(outcome.rejection(), Some(Rejection::RateLimited { .. })) {
            if let Err(e) = self.register(message).await {
                warn!("Could not register chat {chat_id}: {e:#}");
            }
        }
        Ok(Reply::outcome(message, outcome))
    }

    async fn register(&self, message: &IncomingMessage) -> Result<User> {
        self.users
            .register(
                &message.chat_id,
                message.display_name.as_deref(),
                message.received_at,
            )
            .await
    }
}

/// Empty messages, overly long ones, and ones with nothing but punctuation or emoji are not worth
/// an answer.
fn is_actionable(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty()
        && text.chars().count() <= MAX_MESSAGE_CHARS
        && text.chars().any(char::is_alphanumeric)
}

fn greeting(user: &User) -> String {
    format!("Olá, {}! Eu registro suas entradas e saídas.\n\n{HELP}", user.display_name())
}

fn outcome_text(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Recorded {
            transaction,
            duplicate,
        } => {
            let kind = match transaction.direction() {
                Direction::Inflow => "Entrada",
                Direction::Outflow => "Saída",
            };
            let prefix = if *duplicate { "Já registrado. " } else { "" };
            format!(
                "{prefix}{kind} de {} em {}: {} ({})",
                transaction.amount().brl(),
                transaction.occurred_on().format("%d/%m/%Y"),
                transaction.description(),
                transaction.category()
            )
        }
        Outcome::Rejected { rejection } => rejection.user_message(),
    }
}

pub(crate) fn balance_text(overall: &OverallBalance) -> String {
    let lifetime = &overall.lifetime;
    format!(
        "Saldo total: {}\nEntradas: {}\nSaídas: {}\nMovimentos: {}\nSaldo de {}: {}",
        format_brl(lifetime.net),
        format_brl(lifetime.inflow_total),
        format_brl(lifetime.outflow_total),
        lifetime.count,
        overall.month,
        format_brl(overall.month_net)
    )
}

pub(crate) fn report_text(report: &MonthlyReport) -> String {
    if report.balance.count == 0 {
        return format!("Nenhum movimento em {}.", report.month);
    }
    let mut text = format!(
        "Relatório de {}\nEntradas: {}\nSaídas: {}\nSaldo: {}\n",
        report.month,
        format_brl(report.balance.inflow_total),
        format_brl(report.balance.outflow_total),
        format_brl(report.balance.net)
    );
    for group in &report.groups {
        let _ = write!(
            text,
            "\n{}: {} ({})",
            group.category,
            format_brl(group.total),
            group.transactions.len()
        );
    }
    text
}
