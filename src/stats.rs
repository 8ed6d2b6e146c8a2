use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::MarksRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "C")]
    C,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl Grade {
    /// Closed lower bounds: exactly 90.0 is `A+`.
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 90.0 {
            Grade::APlus
        } else if percentage >= 80.0 {
            Grade::A
        } else if percentage >= 70.0 {
            Grade::BPlus
        } else if percentage >= 60.0 {
            Grade::B
        } else {
            Grade::C
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::C => "C",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored percentages are strings; anything unparseable counts as zero.
pub fn parse_percentage(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(0.0)
}

pub fn average(records: &[MarksRecord]) -> String {
    if records.is_empty() {
        return "0.0".to_string();
    }

    let total: f64 = records
        .iter()
        .map(|record| parse_percentage(&record.fields.percentage))
        .sum();

    format!("{:.1}", total / records.len() as f64)
}

pub fn highest(records: &[MarksRecord]) -> String {
    records
        .iter()
        .map(|record| parse_percentage(&record.fields.percentage))
        .reduce(f64::max)
        .map(|best| format!("{:.1}", best))
        .unwrap_or_else(|| "0".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarksSummary {
    pub average: String,
    pub highest: String,
    pub count: usize,
}

impl MarksSummary {
    pub fn of(records: &[MarksRecord]) -> Self {
        Self {
            average: average(records),
            highest: highest(records),
            count: records.len(),
        }
    }
}
