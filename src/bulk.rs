use std::collections::HashSet;

use chrono::NaiveDate;

use crate::export::ImportRow;
use crate::models::{StudentFields, StudentRecord};
use crate::store::{StoreError, StudentStore};
use crate::validate::{self, FieldErrors};

struct Sample<'a> {
    code: &'a str,
    first: &'a str,
    last: &'a str,
    email: &'a str,
    born: (i32, u32, u32),
    hometown: &'a str,
    scores: [f64; 3],
}

impl Sample<'_> {
    fn fields(&self) -> Option<StudentFields> {
        let (year, month, day) = self.born;
        NaiveDate::from_ymd_opt(year, month, day).map(|date_of_birth| StudentFields {
            student_code: Some(self.code.to_string()),
            first_name: self.first.to_string(),
            last_name: self.last.to_string(),
            email: self.email.to_string(),
            date_of_birth,
            hometown: self.hometown.to_string(),
            math_score: self.scores[0],
            literature_score: self.scores[1],
            english_score: self.scores[2],
        })
    }
}

fn sample_students() -> Vec<StudentFields> {
    [
        Sample {
            code: "SV001",
            first: "John",
            last: "Doe",
            email: "john.doe@example.com",
            born: (2000, 5, 15),
            hometown: "Hanoi",
            scores: [8.5, 7.0, 9.0],
        },
        Sample {
            code: "SV002",
            first: "Jane",
            last: "Smith",
            email: "jane.smith@example.com",
            born: (2001, 3, 22),
            hometown: "Ho Chi Minh City",
            scores: [9.0, 8.5, 7.5],
        },
        Sample {
            code: "SV003",
            first: "David",
            last: "Nguyen",
            email: "david.nguyen@example.com",
            born: (2000, 11, 10),
            hometown: "Da Nang",
            scores: [7.5, 9.0, 8.0],
        },
    ]
    .iter()
    .filter_map(Sample::fields)
    .collect()
}

/// Inserts the sample students whose email and student code are not already present.
pub async fn seed(store: &dyn StudentStore) -> Result<usize, StoreError> {
    let records = store.list().await?;
    let emails: HashSet<String> = records.iter().map(|record| record.email.to_lowercase()).collect();
    let codes: HashSet<&str> = records.iter().filter_map(|record| record.student_code.as_deref()).collect();

    let mut inserted = 0usize;
    for fields in sample_students() {
        let code_taken = fields.student_code.as_deref().is_some_and(|code| codes.contains(code));
        if code_taken || emails.contains(&fields.email.to_lowercase()) {
            continue;
        }
        store.create(fields).await?;
        inserted += 1;
    }
    Ok(inserted)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub line: u64,
    pub errors: FieldErrors,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedRow {
    pub line: u64,
    pub error: StoreError,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub created: Vec<StudentRecord>,
    pub rejected: Vec<RejectedRow>,
    pub failed: Vec<FailedRow>,
}

/// Validates every row without writing anything.
pub fn check_rows(rows: &[ImportRow]) -> Vec<RejectedRow> {
    rows.iter()
        .filter_map(|row| {
            let errors = validate::validate(&row.draft);
            (!errors.is_empty()).then(|| RejectedRow { line: row.line, errors })
        })
        .collect()
}

/// Validates and creates each row on its own; one bad row never stops the batch.
pub async fn import_rows(store: &dyn StudentStore, rows: Vec<ImportRow>) -> ImportReport {
    let mut report = ImportReport::default();

    for row in rows {
        let fields = match validate::parse(&row.draft) {
            Ok(fields) => fields,
            Err(errors) => {
                tracing::warn!(line = row.line, %errors, "import row rejected");
                report.rejected.push(RejectedRow { line: row.line, errors });
                continue;
            }
        };

        match store.create(fields).await {
            Ok(record) => report.created.push(record),
            Err(error) => {
                error.log("import");
                report.failed.push(FailedRow { line: row.line, error });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::read_drafts;
    use crate::models::Field;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn seeding_twice_inserts_once() {
        let store = MemoryStore::new();
        assert_eq!(seed(&store).await.unwrap(), 3);
        assert_eq!(seed(&store).await.unwrap(), 0);
        assert_eq!(store.len(), 3);
        assert_eq!(
            store.get_by_code("SV002").await.unwrap().map(|record| record.first_name),
            Some("Jane".to_string())
        );
    }

    #[tokio::test]
    async fn seeding_skips_a_taken_student_code() {
        let store = MemoryStore::new();
        let squatter = StudentFields {
            student_code: Some("SV001".to_string()),
            ..crate::store::testing::fields("Khoa", 5.0, 5.0, 5.0)
        };
        store.create(squatter).await.unwrap();

        assert_eq!(seed(&store).await.unwrap(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn check_reports_every_invalid_row_by_line() {
        let input = "\
Student Code,First Name,Last Name,Email,Date of Birth,Hometown,Math Score,Literature Score,English Score
SV010,Lan,Pham,lan@example.com,2002-01-09,Hue,8,7.5,9
SV 011,Vo,Vinh,vo@example.com,2002-02-02,Vinh,5,5,5
,Minh,Do,bad-email,2001-12-01,Hanoi,6,6,6
";
        let rows = read_drafts(input.as_bytes()).unwrap();
        let rejected = check_rows(&rows);

        assert_eq!(rejected.iter().map(|row| row.line).collect::<Vec<_>>(), [3, 4]);
        assert!(rejected[0].errors.contains(Field::StudentCode));
        assert!(rejected[1].errors.contains(Field::Email));
    }

    #[tokio::test]
    async fn import_creates_valid_rows_and_reports_the_rest() {
        let input = "\
First Name,Last Name,Email,Date of Birth,Hometown,Math Score,Literature Score,English Score
Lan,Pham,lan@example.com,2002-01-09,\"Hue, Vietnam\",8,7.5,9
,Vo,not-an-email,2002-02-02,Vinh,11,5,5
Minh,Do,minh@example.com,2001-12-01,Hanoi,6,6,6
";
        let rows = read_drafts(input.as_bytes()).unwrap();
        let store = MemoryStore::new();
        let report = import_rows(&store, rows).await;

        assert_eq!(report.created.len(), 2);
        assert_eq!(report.created[0].hometown, "Hue, Vietnam");
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].line, 3);
        assert!(report.rejected[0].errors.contains(Field::FirstName));
        assert!(report.rejected[0].errors.contains(Field::Email));
        assert!(report.rejected[0].errors.contains(Field::MathScore));
        assert!(report.failed.is_empty());
        assert_eq!(store.len(), 2);
    }
}
