//! Retention period: the age after which a record belongs in the cold tier.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TierError;

/// Age threshold for migration.
///
/// Month arithmetic is calendar based, so `Months(3)` applied on May 31st
/// yields a cutoff of February 29th/28th rather than a fixed 90 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RetentionPeriod {
    Months(u32),
    Days(u32),
    Hours(u32),
}

impl Default for RetentionPeriod {
    fn default() -> Self {
        RetentionPeriod::Months(3)
    }
}

impl RetentionPeriod {
    /// Latest timestamp that still counts as aged at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            RetentionPeriod::Months(n) => now
                .checked_sub_months(Months::new(n))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            RetentionPeriod::Days(n) => now - Duration::days(i64::from(n)),
            RetentionPeriod::Hours(n) => now - Duration::hours(i64::from(n)),
        }
    }

    /// `now - timestamp >= period`
    pub fn is_aged(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        timestamp <= self.cutoff(now)
    }
}

impl FromStr for RetentionPeriod {
    type Err = TierError;

    /// Parses `"3 months"`, `"3mo"`, `"90 days"`, `"90d"`, `"12 hours"`, `"12h"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);

        let amount: u32 = digits
            .parse()
            .map_err(|_| TierError::Config(format!("Invalid retention period '{}'", s)))?;
        if amount == 0 {
            return Err(TierError::Config(
                "Retention period must be greater than zero".to_string(),
            ));
        }

        match unit.trim() {
            "mo" | "month" | "months" => Ok(RetentionPeriod::Months(amount)),
            "d" | "day" | "days" => Ok(RetentionPeriod::Days(amount)),
            "h" | "hour" | "hours" => Ok(RetentionPeriod::Hours(amount)),
            other => Err(TierError::Config(format!(
                "Unknown retention unit '{}' (expected months, days or hours)",
                other
            ))),
        }
    }
}

impl TryFrom<String> for RetentionPeriod {
    type Error = TierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RetentionPeriod> for String {
    fn from(value: RetentionPeriod) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RetentionPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPeriod::Months(n) => write!(f, "{} months", n),
            RetentionPeriod::Days(n) => write!(f, "{} days", n),
            RetentionPeriod::Hours(n) => write!(f, "{} hours", n),
        }
    }
}
