//! Read-side reductions over the ledger. Nothing is cached: every call queries the store and
//! folds the current rows, so a write is visible to the next read.

use crate::model::{ChatId, Direction, Month, Transaction, TransactionColumn};
use crate::store::{Store, Table};
use crate::Result;
use anyhow::Context;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub inflow_total: Decimal,
    pub outflow_total: Decimal,
    /// `inflow_total - outflow_total`
    pub net: Decimal,
    pub count: usize,
}

impl Default for Balance {
    fn default() -> Self {
        Self {
            inflow_total: money(Decimal::ZERO),
            outflow_total: money(Decimal::ZERO),
            net: money(Decimal::ZERO),
            count: 0,
        }
    }
}

impl Balance {
    pub fn add(&mut self, transaction: &Transaction) {
        let amount = transaction.amount().value();
        match transaction.direction() {
            Direction::Inflow => self.inflow_total = money(self.inflow_total + amount),
            Direction::Outflow => self.outflow_total = money(self.outflow_total + amount),
        }
        self.net = money(self.inflow_total - self.outflow_total);
        self.count += 1;
    }

    pub fn from_transactions<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> Self {
        let mut balance = Self::default();
        for tx in transactions {
            balance.add(tx);
        }
        balance
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryGroup {
    pub category: String,
    pub inflow: Decimal,
    pub outflow: Decimal,
    /// `inflow - outflow`
    pub total: Decimal,
    /// Ordered by `occurred_on`, then by the order in which they were recorded.
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyReport {
    pub month: Month,
    pub balance: Balance,
    /// Ordered by descending absolute total, then by category name.
    pub groups: Vec<CategoryGroup>,
}

/// Lifetime totals for a chat, plus the net of the current month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverallBalance {
    pub lifetime: Balance,
    pub month: Month,
    pub month_net: Decimal,
}

#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn Store>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn balance(&self, chat_id: &ChatId, month: Month) -> Result<Balance> {
        let transactions = self.month_transactions(chat_id, month).await?;
        Ok(Balance::from_transactions(&transactions))
    }

    pub async fn monthly_report(&self, chat_id: &ChatId, month: Month) -> Result<MonthlyReport> {
        let transactions = self.month_transactions(chat_id, month).await?;
        let balance = Balance::from_transactions(&transactions);
        Ok(MonthlyReport {
            month,
            balance,
            groups: group_by_category(transactions),
        })
    }

    pub async fn overall_balance(
        &self,
        chat_id: &ChatId,
        current_month: Month,
    ) -> Result<OverallBalance> {
        let rows = self
            .store
            .find_by(
                Table::Movimentos,
                &TransactionColumn::ChatId.to_string(),
                chat_id.as_str(),
            )
            .await
            .with_context(|| format!("Unable to read the transactions of chat {chat_id}"))?;
        let transactions = parse_rows(&rows)?;
        let range = current_month.range();
        let month = Balance::from_transactions(
            transactions.iter().filter(|tx| range.contains(tx.occurred_on())),
        );
        Ok(OverallBalance {
            lifetime: Balance::from_transactions(&transactions),
            month: current_month,
            month_net: month.net,
        })
    }

    async fn month_transactions(&self, chat_id: &ChatId, month: Month) -> Result<Vec<Transaction>> {
        let rows = self
            .store
            .query_range(Table::Movimentos, chat_id, month.range())
            .await
            .with_context(|| format!("Unable to read {month} for chat {chat_id}"))?;
        parse_rows(&rows)
    }
}

fn parse_rows(rows: &[crate::model::Row]) -> Result<Vec<Transaction>> {
    rows.iter().map(Transaction::from_row).collect()
}

fn group_by_category(transactions: Vec<Transaction>) -> Vec<CategoryGroup> {
    let mut by_category: BTreeMap<String, Vec<Transaction>> = BTreeMap::new();
    for tx in transactions {
        by_category
            .entry(tx.category().to_string())
            .or_default()
            .push(tx);
    }

    let mut groups: Vec<CategoryGroup> = by_category
        .into_iter()
        .map(|(category, mut transactions)| {
            transactions.sort_by_key(|tx| tx.occurred_on());
            let balance = Balance::from_transactions(&transactions);
            CategoryGroup {
                category,
                inflow: balance.inflow_total,
                outflow: balance.outflow_total,
                total: balance.net,
                transactions,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.total
            .abs()
            .cmp(&a.total.abs())
            .then_with(|| a.category.cmp(&b.category))
    });
    groups
}

fn money(value: Decimal) -> Decimal {
    let mut value = value;
    value.rescale(2);
    value
}
