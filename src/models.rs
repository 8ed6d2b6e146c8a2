use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::store::Document;

pub const MARKS_COLLECTION: &str = "studentMarks";
pub const USERS_COLLECTION: &str = "users";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Mid1,
    Mid2,
    Assign1,
    Assign2,
    Lab,
    Final,
}

impl Period {
    pub const ALL: [Period; 6] = [
        Period::Mid1,
        Period::Mid2,
        Period::Assign1,
        Period::Assign2,
        Period::Lab,
        Period::Final,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Mid1 => "mid1",
            Period::Mid2 => "mid2",
            Period::Assign1 => "assign1",
            Period::Assign2 => "assign2",
            Period::Lab => "lab",
            Period::Final => "final",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Period::Mid1 => "Mid-Term 1",
            Period::Mid2 => "Mid-Term 2",
            Period::Assign1 => "Assignment 1",
            Period::Assign2 => "Assignment 2",
            Period::Lab => "Lab Internal",
            Period::Final => "Final Exam",
        }
    }

    /// Display label for a stored period, falling back to the raw value for
    /// periods outside the known set.
    pub fn label_for(raw: &str) -> String {
        raw.parse::<Period>()
            .map(|period| period.label().to_string())
            .unwrap_or_else(|_| raw.to_string())
    }
}

impl FromStr for Period {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .into_iter()
            .find(|period| period.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unknown assessment period: {}", s)))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marks as entered by a teacher, before normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksEntry {
    pub year: String,
    pub branch: String,
    pub section: String,
    pub roll_number: String,
    pub student_name: String,
    pub student_email: String,
    #[serde(default)]
    pub student_id: Option<String>,
    pub period: String,
    pub marks: i64,
    pub max_marks: i64,
}

/// The stored body of a marks document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MarksFields {
    pub year: String,
    pub branch: String,
    pub section: String,
    pub roll_number: String,
    pub student_name: String,
    pub student_email: String,
    pub student_id: String,
    pub period: String,
    pub marks: i64,
    pub max_marks: i64,
    pub percentage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
}

impl MarksFields {
    /// Normalises an entry for writing: branch and section upper-cased,
    /// student id defaulted, percentage derived from the raw marks.
    pub fn from_entry(entry: MarksEntry, teacher_id: Option<String>) -> Self {
        let student_id = match entry.student_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => default_student_id(
                &entry.year,
                &entry.branch,
                &entry.section,
                &entry.roll_number,
            ),
        };

        Self {
            percentage: percentage(entry.marks, entry.max_marks),
            branch: entry.branch.to_uppercase(),
            section: entry.section.to_uppercase(),
            year: entry.year,
            roll_number: entry.roll_number,
            student_name: entry.student_name,
            student_email: entry.student_email,
            student_id,
            period: entry.period,
            marks: entry.marks,
            max_marks: entry.max_marks,
            teacher_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: MarksFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<Document> for MarksRecord {
    type Error = AppError;

    fn try_from(doc: Document) -> Result<Self, Self::Error> {
        Ok(Self {
            fields: doc.decode()?,
            id: doc.id,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        })
    }
}

/// `marks / max_marks * 100` with two fractional digits.
pub fn percentage(marks: i64, max_marks: i64) -> String {
    format!("{:.2}", marks as f64 / max_marks as f64 * 100.0)
}

pub fn default_student_id(year: &str, branch: &str, section: &str, roll_number: &str) -> String {
    format!("{}{}{}{}", year, branch, section, roll_number)
}
