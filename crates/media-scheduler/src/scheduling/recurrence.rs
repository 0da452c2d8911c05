//! Recurrence descriptor and its expression parser
//!
//! Recurring jobs carry an interval expressed in a small closed language:
//!
//! | form | meaning |
//! |---|---|
//! | `every_5m` / `every_2h` / `every_1d` | compact interval |
//! | `every_30_minutes` / `every_2_hours` / `every_1_days` | long interval |
//! | `hourly` / `daily` | shorthand for `every_1h` / `every_1d` |
//!
//! Anything else is rejected at submission time with a
//! [`RecurrenceParseError`]; a malformed expression never silently turns a
//! recurring job into a run-once job.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unit of a recurrence interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    fn suffix(self) -> char {
        match self {
            Self::Minutes => 'm',
            Self::Hours => 'h',
            Self::Days => 'd',
        }
    }
}

/// Typed recurrence interval for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Recurrence {
    value: u32,
    unit: IntervalUnit,
}

impl Recurrence {
    /// Create a recurrence; the interval must be at least one unit
    pub fn new(value: u32, unit: IntervalUnit) -> Result<Self, RecurrenceParseError> {
        if value == 0 {
            return Err(RecurrenceParseError::ZeroInterval);
        }
        Ok(Self { value, unit })
    }

    /// The wall-clock interval between runs
    pub fn interval(&self) -> chrono::Duration {
        let value = i64::from(self.value);
        match self.unit {
            IntervalUnit::Minutes => chrono::Duration::minutes(value),
            IntervalUnit::Hours => chrono::Duration::hours(value),
            IntervalUnit::Days => chrono::Duration::days(value),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every_{}{}", self.value, self.unit.suffix())
    }
}

/// Errors produced when parsing a recurrence expression
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecurrenceParseError {
    /// The expression does not match any supported form
    #[error("unrecognized schedule expression '{0}'")]
    Unrecognized(String),

    /// The interval count is not a valid number
    #[error("schedule expression '{expression}' has an invalid interval: {reason}")]
    InvalidInterval { expression: String, reason: String },

    /// Zero-length intervals would re-enqueue a job for the same instant
    #[error("schedule interval must be at least one unit")]
    ZeroInterval,
}

impl FromStr for Recurrence {
    type Err = RecurrenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expression = s.trim();

        match expression {
            "hourly" => return Self::new(1, IntervalUnit::Hours),
            "daily" => return Self::new(1, IntervalUnit::Days),
            _ => {}
        }

        let rest = expression
            .strip_prefix("every_")
            .ok_or_else(|| RecurrenceParseError::Unrecognized(expression.to_string()))?;

        // Long form: "30_minutes", "2_hours", "1_days"
        if let Some((count, unit_word)) = rest.split_once('_') {
            let unit = match unit_word {
                "minute" | "minutes" => IntervalUnit::Minutes,
                "hour" | "hours" => IntervalUnit::Hours,
                "day" | "days" => IntervalUnit::Days,
                _ => return Err(RecurrenceParseError::Unrecognized(expression.to_string())),
            };
            let value = parse_count(count, expression)?;
            return Self::new(value, unit);
        }

        // Compact form: "5m", "2h", "1d"
        let unit = match rest.chars().last() {
            Some('m') => IntervalUnit::Minutes,
            Some('h') => IntervalUnit::Hours,
            Some('d') => IntervalUnit::Days,
            _ => return Err(RecurrenceParseError::Unrecognized(expression.to_string())),
        };
        let value = parse_count(&rest[..rest.len() - 1], expression)?;
        Self::new(value, unit)
    }
}

fn parse_count(digits: &str, expression: &str) -> Result<u32, RecurrenceParseError> {
    digits
        .parse()
        .map_err(|e| RecurrenceParseError::InvalidInterval {
            expression: expression.to_string(),
            reason: format!("{e}"),
        })
}

impl Serialize for Recurrence {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Recurrence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RecurrenceVisitor;

        impl<'de> Visitor<'de> for RecurrenceVisitor {
            type Value = Recurrence;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a schedule expression such as 'every_5m' or 'daily'")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(RecurrenceVisitor)
    }
}
