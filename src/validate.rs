use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::models::{Field, StudentDraft, StudentFields, Subject};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;

const INVALID_EMAIL: &str = "Invalid email format";
const INVALID_DATE: &str = "Date of birth must be a valid date (YYYY-MM-DD)";
const INVALID_SCORE: &str = "Score must be a number between 0 and 10";
const INVALID_CODE: &str = "Student code must be at most 50 characters with no spaces";

pub const STUDENT_CODE_MAX: usize = 50;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"))
}

/// Field-level validation messages, keyed by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<Field, String>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn insert(&mut self, field: Field, message: impl Into<String>) {
        self.0.insert(field, message.into());
    }

    pub fn remove(&mut self, field: Field) -> Option<String> {
        self.0.remove(&field)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.0.iter().map(|(field, message)| (*field, message.as_str()))
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in self.iter() {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}

pub fn required_message(field: Field) -> String {
    match field {
        Field::StudentCode => "Student code is required".to_string(),
        Field::FirstName => "First name is required".to_string(),
        Field::LastName => "Last name is required".to_string(),
        Field::Email => "Email is required".to_string(),
        Field::DateOfBirth => "Date of birth is required".to_string(),
        Field::Hometown => "Hometown is required".to_string(),
        Field::MathScore | Field::LiteratureScore | Field::EnglishScore => {
            let subject = field.subject().map(Subject::label).unwrap_or("Subject");
            format!("{subject} score is required")
        }
    }
}

/// Every rule runs; nothing short-circuits.
pub fn validate(draft: &StudentDraft) -> FieldErrors {
    match parse(draft) {
        Ok(_) => FieldErrors::default(),
        Err(errors) => errors,
    }
}

pub fn parse(draft: &StudentDraft) -> Result<StudentFields, FieldErrors> {
    let mut errors = FieldErrors::default();

    let student_code = parse_code(draft, &mut errors);
    let first_name = required_text(draft, Field::FirstName, &mut errors);
    let last_name = required_text(draft, Field::LastName, &mut errors);
    let hometown = required_text(draft, Field::Hometown, &mut errors);
    let email = parse_email(draft, &mut errors);
    let date_of_birth = parse_date(draft, &mut errors);
    let math_score = parse_score(draft, Field::MathScore, &mut errors);
    let literature_score = parse_score(draft, Field::LiteratureScore, &mut errors);
    let english_score = parse_score(draft, Field::EnglishScore, &mut errors);

    let (Some(date_of_birth), Some(math_score), Some(literature_score), Some(english_score)) =
        (date_of_birth, math_score, literature_score, english_score)
    else {
        return Err(errors);
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(StudentFields {
        student_code,
        first_name,
        last_name,
        email,
        date_of_birth,
        hometown,
        math_score,
        literature_score,
        english_score,
    })
}

pub fn score_in_range(value: f64) -> bool {
    value.is_finite() && (SCORE_MIN..=SCORE_MAX).contains(&value)
}

fn required_text(draft: &StudentDraft, field: Field, errors: &mut FieldErrors) -> String {
    let value = draft.get(field).trim();
    if value.is_empty() {
        errors.insert(field, required_message(field));
    }
    value.to_string()
}

/// Optional; blank means the store or backend assigns none.
fn parse_code(draft: &StudentDraft, errors: &mut FieldErrors) -> Option<String> {
    let value = draft.student_code.trim();
    if value.is_empty() {
        return None;
    }
    if value.chars().count() > STUDENT_CODE_MAX || value.chars().any(char::is_whitespace) {
        errors.insert(Field::StudentCode, INVALID_CODE);
    }
    Some(value.to_string())
}

fn parse_email(draft: &StudentDraft, errors: &mut FieldErrors) -> String {
    let value = draft.email.trim();
    if value.is_empty() {
        errors.insert(Field::Email, required_message(Field::Email));
    } else if !email_pattern().is_match(value) {
        errors.insert(Field::Email, INVALID_EMAIL);
    }
    value.to_string()
}

fn parse_date(draft: &StudentDraft, errors: &mut FieldErrors) -> Option<NaiveDate> {
    let value = draft.date_of_birth.trim();
    if value.is_empty() {
        errors.insert(Field::DateOfBirth, required_message(Field::DateOfBirth));
        return None;
    }

    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errors.insert(Field::DateOfBirth, INVALID_DATE);
            None
        }
    }
}

fn parse_score(draft: &StudentDraft, field: Field, errors: &mut FieldErrors) -> Option<f64> {
    let value = draft.get(field).trim();
    if value.is_empty() {
        errors.insert(field, required_message(field));
        return None;
    }

    match value.parse::<f64>() {
        Ok(score) if score_in_range(score) => Some(score),
        _ => {
            errors.insert(field, INVALID_SCORE);
            None
        }
    }
}
