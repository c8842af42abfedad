use std::fmt::Write;

use crate::analytics::{self, Analytics, BandScheme, TOP_STUDENTS};
use crate::models::{StudentRecord, Subject};

const NEEDS_ATTENTION: usize = 5;

fn format_average(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "N/A".to_string())
}

pub fn build_report(scope: Option<&str>, records: &[StudentRecord], scheme: BandScheme) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all students");

    let _ = writeln!(output, "# Student Performance Report");
    let _ = writeln!(output, "Generated for {} ({} records)", scope_label, records.len());
    let _ = writeln!(output);

    let summary = match analytics::summarize(records, scheme) {
        Analytics::NoData => {
            let _ = writeln!(output, "No student data available.");
            return output;
        }
        Analytics::Summary(summary) => summary,
    };

    let _ = writeln!(output, "## Subject Averages");
    for subject in Subject::ALL {
        let _ = writeln!(
            output,
            "- {}: {}",
            subject.label(),
            format_average(summary.subject_average(subject))
        );
    }
    let _ = writeln!(output, "- Overall: {}", format_average(summary.avg_overall_score));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Performance Distribution");
    for entry in summary.distribution.iter() {
        let _ = writeln!(output, "- {}: {}", entry.band.label(), entry.count);
    }
    if summary.unscored > 0 {
        let _ = writeln!(output, "- unscored: {}", summary.unscored);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Students");
    let top = analytics::top_students(records, TOP_STUDENTS);
    if top.is_empty() {
        let _ = writeln!(output, "No scored students yet.");
    } else {
        for (rank, student) in top.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. {} ({}) average {:.2}",
                rank + 1,
                student.name,
                student.id,
                student.average
            );
        }
    }

    let mut struggling: Vec<&StudentRecord> = records
        .iter()
        .filter(|record| {
            record
                .average_score()
                .map(|average| scheme.classify(average) == analytics::Band::Weak)
                .unwrap_or(false)
        })
        .collect();
    struggling.sort_by(|a, b| {
        a.average_score()
            .partial_cmp(&b.average_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Attention");
    if struggling.is_empty() {
        let _ = writeln!(output, "No students in the weak band.");
    } else {
        for record in struggling.iter().take(NEEDS_ATTENTION) {
            let _ = writeln!(
                output,
                "- {} ({}) average {}",
                record.full_name(),
                record.email,
                format_average(record.average_score())
            );
        }
    }

    output
}
