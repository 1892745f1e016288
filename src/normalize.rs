//! Pure functions that turn raw tokens (typed by a person, or suggested by the NLU) into typed
//! values. Nothing here reads the clock: relative dates are resolved against a reference date
//! supplied by the caller.

use crate::model::{Amount, Direction};
use crate::rejection::Rejection;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use std::str::FromStr;
use tracing::debug;

/// The category used when nothing better is known.
pub const FALLBACK_CATEGORY: &str = "outros";

pub const MAX_DESCRIPTION_CHARS: usize = 200;
pub const MAX_CATEGORY_CHARS: usize = 50;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];

const CATEGORY_PLACEHOLDERS: &[&str] = &[
    "unknown",
    "desconhecido",
    "desconhecida",
    "n/a",
    "none",
    "null",
    "-",
    "sem categoria",
];

/// Parses an amount such as `R$ 1.250,50`, `35.90` or `150`.
pub fn parse_amount(text: &str) -> Result<Amount, Rejection> {
    Amount::from_str(text).map_err(|e| {
        debug!("Rejected amount '{text}': {e}");
        Rejection::InvalidAmount
    })
}

/// Resolves `hoje`, `ontem`, `anteontem` (and their English forms) or an explicit date.
pub fn resolve_date(text: &str, reference: NaiveDate) -> Result<NaiveDate, Rejection> {
    let text = text.trim().to_lowercase();
    let days_back = match text.as_str() {
        "hoje" | "today" => Some(0),
        "ontem" | "yesterday" => Some(1),
        "anteontem" => Some(2),
        _ => None,
    };
    if let Some(days) = days_back {
        return reference
            .checked_sub_days(Days::new(days))
            .ok_or(Rejection::InvalidDate);
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&text, format).ok())
        .ok_or_else(|| {
            debug!("Could not resolve date '{text}'");
            Rejection::InvalidDate
        })
}

/// Lower-cases and tidies a category. Never fails: unknown or empty categories become `outros`.
pub fn normalize_category(text: &str) -> String {
    let category = clean_text(text).to_lowercase();
    if category.is_empty() || CATEGORY_PLACEHOLDERS.contains(&category.as_str()) {
        return FALLBACK_CATEGORY.to_string();
    }
    truncate_chars(&category, MAX_CATEGORY_CHARS)
}

pub fn parse_direction(text: &str) -> Option<Direction> {
    match clean_text(text).to_lowercase().as_str() {
        "entrada" | "inflow" | "receita" | "recebimento" | "income" => Some(Direction::Inflow),
        "saida" | "saída" | "outflow" | "despesa" | "pagamento" | "expense" => {
            Some(Direction::Outflow)
        }
        _ => None,
    }
}

/// Drops control characters and collapses runs of whitespace into single spaces.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncates to at most `max` characters (not bytes), trimming any trailing space left behind.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((ix, _)) => text[..ix].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// The calendar date of `at` in the given UTC offset.
pub fn local_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}
