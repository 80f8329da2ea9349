//! Ensemble summary statistics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the seven summary statistics computed across ensemble members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Statistic {
    #[serde(rename = "ensemble_mean", alias = "mean")]
    Mean,
    #[serde(rename = "ensemble_median", alias = "median")]
    Median,
    #[serde(rename = "ensemble_stddev", alias = "stddev")]
    StdDev,
    #[serde(rename = "ensemble_min", alias = "min")]
    Min,
    #[serde(rename = "ensemble_max", alias = "max")]
    Max,
    #[serde(rename = "ensemble_q1", alias = "q1")]
    Q1,
    #[serde(rename = "ensemble_q3", alias = "q3")]
    Q3,
}

impl Statistic {
    /// All statistics in column order.
    pub const ALL: [Statistic; 7] = [
        Statistic::Mean,
        Statistic::Median,
        Statistic::StdDev,
        Statistic::Min,
        Statistic::Max,
        Statistic::Q1,
        Statistic::Q3,
    ];

    /// Statistic whose absence marks a row as undefined.
    pub const PRIMARY: Statistic = Statistic::Mean;

    /// Output column name, e.g. `ensemble_mean`.
    pub fn column_name(self) -> &'static str {
        match self {
            Statistic::Mean => "ensemble_mean",
            Statistic::Median => "ensemble_median",
            Statistic::StdDev => "ensemble_stddev",
            Statistic::Min => "ensemble_min",
            Statistic::Max => "ensemble_max",
            Statistic::Q1 => "ensemble_q1",
            Statistic::Q3 => "ensemble_q3",
        }
    }

    /// Position of this statistic in [`Statistic::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        let short = name.strip_prefix("ensemble_").unwrap_or(&name);
        match short {
            "mean" => Ok(Statistic::Mean),
            "median" => Ok(Statistic::Median),
            "stddev" | "std" => Ok(Statistic::StdDev),
            "min" => Ok(Statistic::Min),
            "max" => Ok(Statistic::Max),
            "q1" => Ok(Statistic::Q1),
            "q3" => Ok(Statistic::Q3),
            _ => Err(format!("Unknown statistic: {}", s)),
        }
    }
}

/// A value for each [`Statistic`], indexed by [`Statistic::index`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticValues([f64; 7]);

impl StatisticValues {
    /// All statistics undefined.
    pub fn undefined() -> Self {
        Self([f64::NAN; 7])
    }

    /// Every statistic set to the same value.
    pub fn splat(value: f64) -> Self {
        Self([value; 7])
    }

    pub fn get(&self, stat: Statistic) -> f64 {
        self.0[stat.index()]
    }

    pub fn set(&mut self, stat: Statistic, value: f64) {
        self.0[stat.index()] = value;
    }

    /// Whether the primary statistic holds a finite value.
    pub fn is_defined(&self) -> bool {
        self.get(Statistic::PRIMARY).is_finite()
    }

    /// Iterate `(statistic, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (Statistic, f64)> + '_ {
        Statistic::ALL.iter().map(move |s| (*s, self.get(*s)))
    }

    /// Apply `f` to every value.
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self(self.0.map(f))
    }
}

impl Default for StatisticValues {
    fn default() -> Self {
        Self::undefined()
    }
}
