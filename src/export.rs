//! CSV export of the student collection, and the matching import reader.

use std::io::{self, Read, Write};

use serde::Deserialize;

use crate::analytics::round2;
use crate::models::{StudentDraft, StudentRecord};

/// Spreadsheet tools need it to read accented names as UTF-8.
pub const UTF8_BOM: &str = "\u{FEFF}";

pub const HEADERS: [&str; 11] = [
    "ID",
    "Student Code",
    "First Name",
    "Last Name",
    "Email",
    "Date of Birth",
    "Hometown",
    "Math Score",
    "Literature Score",
    "English Score",
    "Average Score",
];

fn number_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn write_csv<W: Write>(mut writer: W, records: &[StudentRecord]) -> Result<(), csv::Error> {
    writer.write_all(UTF8_BOM.as_bytes())?;
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(HEADERS)?;

    for record in records {
        writer.write_record([
            record.id.to_string(),
            record.student_code.clone().unwrap_or_default(),
            record.first_name.clone(),
            record.last_name.clone(),
            record.email.clone(),
            record
                .date_of_birth
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            record.hometown.clone(),
            number_cell(record.math_score),
            number_cell(record.literature_score),
            number_cell(record.english_score),
            record
                .average_score()
                .map(|average| format!("{:.2}", round2(average)))
                .unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn to_csv_string(records: &[StudentRecord]) -> Result<String, csv::Error> {
    let mut buffer = Vec::new();
    write_csv(&mut buffer, records)?;
    String::from_utf8(buffer).map_err(|e| csv::Error::from(io::Error::new(io::ErrorKind::InvalidData, e)))
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default, rename = "Student Code")]
    student_code: String,
    #[serde(default, rename = "First Name")]
    first_name: String,
    #[serde(default, rename = "Last Name")]
    last_name: String,
    #[serde(default, rename = "Email")]
    email: String,
    #[serde(default, rename = "Date of Birth")]
    date_of_birth: String,
    #[serde(default, rename = "Hometown")]
    hometown: String,
    #[serde(default, rename = "Math Score")]
    math_score: String,
    #[serde(default, rename = "Literature Score")]
    literature_score: String,
    #[serde(default, rename = "English Score")]
    english_score: String,
}

/// One data row of an import file, with its line number for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    pub line: u64,
    pub draft: StudentDraft,
}

/// Reads rows laid out like an export. `ID` and `Average Score` are ignored,
/// and a leading byte order mark is skipped.
pub fn read_drafts<R: Read>(mut reader: R) -> Result<Vec<ImportRow>, csv::Error> {
    let mut input = Vec::new();
    reader.read_to_end(&mut input)?;
    let input = input.strip_prefix(UTF8_BOM.as_bytes()).unwrap_or(&input);

    let mut reader = csv::Reader::from_reader(input);
    let mut rows = Vec::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        rows.push(ImportRow {
            line: rows.len() as u64 + 2,
            draft: StudentDraft {
                student_code: row.student_code,
                first_name: row.first_name,
                last_name: row.last_name,
                email: row.email,
                date_of_birth: row.date_of_birth,
                hometown: row.hometown,
                math_score: row.math_score,
                literature_score: row.literature_score,
                english_score: row.english_score,
            },
        });
    }

    Ok(rows)
}
