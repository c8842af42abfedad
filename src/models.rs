use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned record identifier.
///
/// Local stores hand out UUIDs; remote backends may use integer keys, which
/// are carried as their decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric order when both ids are integers, text order otherwise.
    pub fn display_cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<i64>(), other.0.parse::<i64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Math,
    Literature,
    English,
}

impl Subject {
    pub const ALL: [Subject; 3] = [Subject::Math, Subject::Literature, Subject::English];

    pub fn label(self) -> &'static str {
        match self {
            Subject::Math => "Math",
            Subject::Literature => "Literature",
            Subject::English => "English",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: StudentId,
    /// School-issued code, unique within a store when present.
    #[serde(default)]
    pub student_code: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub date_of_birth: Option<NaiveDate>,
    pub hometown: String,
    pub math_score: Option<f64>,
    pub literature_score: Option<f64>,
    pub english_score: Option<f64>,
}

impl StudentRecord {
    pub fn from_fields(id: StudentId, fields: StudentFields) -> Self {
        Self {
            id,
            student_code: fields.student_code,
            first_name: fields.first_name,
            last_name: fields.last_name,
            email: fields.email,
            date_of_birth: Some(fields.date_of_birth),
            hometown: fields.hometown,
            math_score: Some(fields.math_score),
            literature_score: Some(fields.literature_score),
            english_score: Some(fields.english_score),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn score(&self, subject: Subject) -> Option<f64> {
        match subject {
            Subject::Math => self.math_score,
            Subject::Literature => self.literature_score,
            Subject::English => self.english_score,
        }
    }

    /// Mean of the scores that are present. Never stored.
    pub fn average_score(&self) -> Option<f64> {
        let present: Vec<f64> = Subject::ALL
            .iter()
            .filter_map(|subject| self.score(*subject))
            .collect();

        if present.is_empty() {
            None
        } else {
            Some(present.iter().sum::<f64>() / present.len() as f64)
        }
    }
}

/// A validated create/update payload. Stores accept nothing else.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentFields {
    pub student_code: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub date_of_birth: NaiveDate,
    pub hometown: String,
    pub math_score: f64,
    pub literature_score: f64,
    pub english_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    StudentCode,
    FirstName,
    LastName,
    Email,
    DateOfBirth,
    Hometown,
    MathScore,
    LiteratureScore,
    EnglishScore,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::StudentCode,
        Field::FirstName,
        Field::LastName,
        Field::Email,
        Field::DateOfBirth,
        Field::Hometown,
        Field::MathScore,
        Field::LiteratureScore,
        Field::EnglishScore,
    ];

    /// Every field except the student code must be filled in.
    pub const REQUIRED: [Field; 8] = [
        Field::FirstName,
        Field::LastName,
        Field::Email,
        Field::DateOfBirth,
        Field::Hometown,
        Field::MathScore,
        Field::LiteratureScore,
        Field::EnglishScore,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Field::StudentCode => "studentCode",
            Field::FirstName => "firstName",
            Field::LastName => "lastName",
            Field::Email => "email",
            Field::DateOfBirth => "dateOfBirth",
            Field::Hometown => "hometown",
            Field::MathScore => "mathScore",
            Field::LiteratureScore => "literatureScore",
            Field::EnglishScore => "englishScore",
        }
    }

    pub fn subject(self) -> Option<Subject> {
        match self {
            Field::MathScore => Some(Subject::Math),
            Field::LiteratureScore => Some(Subject::Literature),
            Field::EnglishScore => Some(Subject::English),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        Field::ALL
            .into_iter()
            .find(|field| field.key().to_ascii_lowercase() == normalized)
            .ok_or_else(|| format!("unknown field: {value}"))
    }
}

/// Raw form input, one text value per editable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentDraft {
    pub student_code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub date_of_birth: String,
    pub hometown: String,
    pub math_score: String,
    pub literature_score: String,
    pub english_score: String,
}

impl StudentDraft {
    pub fn from_record(record: &StudentRecord) -> Self {
        let score_text = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();

        Self {
            student_code: record.student_code.clone().unwrap_or_default(),
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            email: record.email.clone(),
            date_of_birth: record
                .date_of_birth
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            hometown: record.hometown.clone(),
            math_score: score_text(record.math_score),
            literature_score: score_text(record.literature_score),
            english_score: score_text(record.english_score),
        }
    }

    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::StudentCode => &self.student_code,
            Field::FirstName => &self.first_name,
            Field::LastName => &self.last_name,
            Field::Email => &self.email,
            Field::DateOfBirth => &self.date_of_birth,
            Field::Hometown => &self.hometown,
            Field::MathScore => &self.math_score,
            Field::LiteratureScore => &self.literature_score,
            Field::EnglishScore => &self.english_score,
        }
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let slot = match field {
            Field::StudentCode => &mut self.student_code,
            Field::FirstName => &mut self.first_name,
            Field::LastName => &mut self.last_name,
            Field::Email => &mut self.email,
            Field::DateOfBirth => &mut self.date_of_birth,
            Field::Hometown => &mut self.hometown,
            Field::MathScore => &mut self.math_score,
            Field::LiteratureScore => &mut self.literature_score,
            Field::EnglishScore => &mut self.english_score,
        };
        *slot = value.into();
    }
}

/// The single list shape every backend response is normalized into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<StudentRecord>,
    pub total_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(math: Option<f64>, literature: Option<f64>, english: Option<f64>) -> StudentRecord {
        StudentRecord {
            id: StudentId::new("1"),
            student_code: Some("SV001".to_string()),
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            email: "john.doe@example.com".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2000, 5, 15),
            hometown: "Hanoi".to_string(),
            math_score: math,
            literature_score: literature,
            english_score: english,
        }
    }

    #[test]
    fn average_uses_present_scores_only() {
        let full = sample_record(Some(8.5), Some(7.0), Some(9.0));
        let expected = (8.5 + 7.0 + 9.0) / 3.0;
        assert!((full.average_score().unwrap_or_default() - expected).abs() < 1e-9);

        let partial = sample_record(Some(6.0), None, Some(8.0));
        assert_eq!(partial.average_score(), Some(7.0));

        let empty = sample_record(None, None, None);
        assert_eq!(empty.average_score(), None);
    }

    #[test]
    fn numeric_ids_order_numerically() {
        let two = StudentId::new("2");
        let ten = StudentId::new("10");
        assert_eq!(two.display_cmp(&ten), Ordering::Less);

        let alpha = StudentId::new("a");
        assert_eq!(ten.display_cmp(&alpha), Ordering::Less);
    }

    #[test]
    fn field_names_parse_in_several_spellings() {
        assert_eq!("firstName".parse::<Field>(), Ok(Field::FirstName));
        assert_eq!("first-name".parse::<Field>(), Ok(Field::FirstName));
        assert_eq!("math_score".parse::<Field>(), Ok(Field::MathScore));
        assert_eq!("student-code".parse::<Field>(), Ok(Field::StudentCode));
        assert!("shoe_size".parse::<Field>().is_err());
    }

    #[test]
    fn draft_from_record_round_trips_text() {
        let record = sample_record(Some(8.5), Some(7.0), Some(9.0));
        let mut draft = StudentDraft::from_record(&record);
        assert_eq!(draft.get(Field::DateOfBirth), "2000-05-15");
        assert_eq!(draft.get(Field::MathScore), "8.5");
        assert_eq!(draft.get(Field::LiteratureScore), "7");
        assert_eq!(draft.get(Field::StudentCode), "SV001");

        draft.set(Field::Hometown, "Hue");
        assert_eq!(draft.hometown, "Hue");
    }
}
