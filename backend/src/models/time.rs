//! Decade-month climatology buckets.
//!
//! A [`DecadeMonth`] identifies every occurrence of one calendar month within
//! one decade, e.g. `2050-01` covers January 2050 through January 2059.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Composite time key used throughout aggregation and loading.
///
/// Ordering is chronological: by decade, then by month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecadeMonth {
    /// First year of the decade (always a multiple of 10)
    pub decade: i32,
    /// Calendar month, 1-12
    pub month: u32,
}

impl DecadeMonth {
    /// Create a bucket, rejecting non-decade years and invalid months.
    pub fn new(decade: i32, month: u32) -> Result<Self, String> {
        if decade.rem_euclid(10) != 0 {
            return Err(format!("{} is not the first year of a decade", decade));
        }
        if !(1..=12).contains(&month) {
            return Err(format!("month {} is outside 1-12", month));
        }
        Ok(Self { decade, month })
    }

    /// Bucket containing a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            decade: date.year().div_euclid(10) * 10,
            month: date.month(),
        }
    }

    /// Text label in `YYYY-MM` form.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DecadeMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.decade, self.month)
    }
}

impl FromStr for DecadeMonth {
    type Err = String;

    /// Parse a `YYYY-MM` label: the first four characters are the decade and
    /// the last two the month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (decade, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("Invalid decade-month label '{}': expected YYYY-MM", s))?;
        let decade: i32 = decade
            .parse()
            .map_err(|_| format!("Invalid decade in label '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("Invalid month in label '{}'", s))?;
        Self::new(decade, month)
    }
}
