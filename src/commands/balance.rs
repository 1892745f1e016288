use crate::aggregate::{Aggregator, MonthlyReport, OverallBalance};
use crate::commands::bot::{balance_text, report_text};
use crate::commands::{open_store, Out};
use crate::model::{ChatId, Month};
use crate::normalize::local_date;
use crate::{Config, Result};
use chrono::Utc;
use std::sync::Arc;

/// Lifetime totals for `chat_id`, with the net of the current month.
pub async fn balance(config: Config, chat_id: ChatId) -> Result<Out<OverallBalance>> {
    let store = open_store(&config).await?;
    let current = Month::containing(local_date(Utc::now(), config.utc_offset()?));
    let overall = Aggregator::new(Arc::new(store.clone()))
        .overall_balance(&chat_id, current)
        .await;
    store.close().await;
    let overall = overall?;
    Ok(Out::new(balance_text(&overall), overall))
}

/// The per-category report of `month`, or of the current month.
pub async fn report(
    config: Config,
    chat_id: ChatId,
    month: Option<Month>,
) -> Result<Out<MonthlyReport>> {
    let store = open_store(&config).await?;
    let month = match month {
        Some(month) => month,
        None => Month::containing(local_date(Utc::now(), config.utc_offset()?)),
    };
    let report = Aggregator::new(Arc::new(store.clone()))
        .monthly_report(&chat_id, month)
        .await;
    store.close().await;
    let report = report?;
    Ok(Out::new(report_text(&report), report))
}
