use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

/// A half-open range of dates, `start <= d < end`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a month, use YYYY-MM, MM/YYYY or YYYY")]
pub struct MonthError(String);

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self, MonthError> {
        if !(1..=12).contains(&month) || NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(MonthError(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Parses user input, where an empty string means the month containing `today`.
    pub fn parse_or_current(text: &str, today: NaiveDate) -> Result<Self, MonthError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::containing(today));
        }
        Self::from_str(text)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.first_day(),
            end: self.next().first_day(),
        }
    }
}

impl FromStr for Month {
    type Err = MonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || MonthError(s.to_string());
        let number = |part: &str, len: usize| -> Result<u32, MonthError> {
            if part.len() != len || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(err());
            }
            part.parse().map_err(|_| err())
        };

        if let Some((year, month)) = s.split_once('-') {
            Month::new(number(year, 4)? as i32, number(month, 2)?).map_err(|_| err())
        } else if let Some((month, year)) = s.split_once('/') {
            let month = if month.len() == 1 {
                number(month, 1)?
            } else {
                number(month, 2)?
            };
            Month::new(number(year, 4)? as i32, month).map_err(|_| err())
        } else {
            Month::new(number(s, 4)? as i32, 1).map_err(|_| err())
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for Month {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Month::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_accepted_forms() {
        let expected = Month::new(2024, 3).unwrap();
        assert_eq!(Month::from_str("2024-03").unwrap(), expected);
        assert_eq!(Month::from_str("03/2024").unwrap(), expected);
        assert_eq!(Month::from_str("3/2024").unwrap(), expected);
        assert_eq!(Month::from_str("2024").unwrap(), Month::new(2024, 1).unwrap());
        assert_eq!(expected.to_string(), "2024-03");
    }

    #[test]
    fn test_rejected_forms() {
        for bad in ["2024-13", "2024-3", "march", "24-03", "00/2024", "2024-03-01", ""] {
            assert!(Month::from_str(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_empty_means_current() {
        let today = date(2024, 7, 15);
        assert_eq!(
            Month::parse_or_current("  ", today).unwrap(),
            Month::new(2024, 7).unwrap()
        );
    }

    #[test]
    fn test_range_is_half_open_across_year_end() {
        let range = Month::new(2023, 12).unwrap().range();
        assert_eq!(range.start, date(2023, 12, 1));
        assert_eq!(range.end, date(2024, 1, 1));
        assert!(range.contains(date(2023, 12, 31)));
        assert!(!range.contains(date(2024, 1, 1)));
    }
}
