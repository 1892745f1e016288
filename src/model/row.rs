use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A spreadsheet-style row: column name -> cell text. This is the shape in which records cross
/// the store boundary, regardless of which store implementation holds them.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, String>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cell for `column`, replacing any previous value.
    pub fn set(&mut self, column: impl fmt::Display, value: impl Into<String>) {
        let _ = self.0.insert(column.to_string(), value.into());
    }

    /// Builder-style variant of `set`.
    pub fn with(mut self, column: impl fmt::Display, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Returns the cell for `column` or an error naming the missing column. A missing column
    /// means the stored data does not have the expected shape.
    pub fn require(&self, column: impl fmt::Display) -> crate::Result<&str> {
        let column = column.to_string();
        self.get(&column)
            .with_context(|| format!("Row is missing the '{column}' column"))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_reports_missing_column() {
        let row = Row::new().with("chat_id", "42");
        assert_eq!(row.require("chat_id").unwrap(), "42");
        let err = row.require("amount").unwrap_err();
        assert!(err.to_string().contains("'amount'"));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let row: Row = [("a", "1"), ("b", "2")].into_iter().collect();
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"a":"1","b":"2"}"#);
    }
}
