use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod analytics;
mod bulk;
mod config;
mod export;
mod form;
mod list;
mod models;
mod report;
mod session;
mod store;
mod validate;
mod wire;

use crate::analytics::{Analytics, BandScheme, TOP_STUDENTS};
use crate::config::{Backend, ConnectionArgs};
use crate::form::{FormController, FormMode, FormState};
use crate::list::{DeleteOutcome, SortField};
use crate::models::{Field, StudentId, StudentRecord, Subject};
use crate::session::AppState;
use crate::store::StoreError;

#[derive(Parser)]
#[command(name = "student-records")]
#[command(about = "Manage student records against an API, Postgres or a local file", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Account used for commands that change data
    #[arg(long, env = "STUDENT_USER", global = true)]
    user: Option<String>,

    #[arg(long, env = "STUDENT_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the Postgres schema
    InitDb,
    /// Insert the sample students
    Seed,
    /// Create students from a CSV file laid out like an export
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Validate every row and report problems without creating anything
        #[arg(long)]
        check: bool,
    },
    /// List students
    List {
        #[arg(long)]
        search: Option<String>,
        /// id, firstName, lastName, email, dateOfBirth, hometown, mathScore,
        /// literatureScore, englishScore or averageScore
        #[arg(long)]
        sort: Option<SortField>,
        #[arg(long)]
        desc: bool,
        /// Zero-based page index
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Show one student by id or by student code
    Show {
        #[arg(required_unless_present = "code")]
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        code: Option<String>,
    },
    /// Add a student
    Add {
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Change fields of an existing student
    Edit {
        id: String,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Delete a student
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Subject averages and performance distribution
    Stats {
        #[arg(long)]
        five_band: bool,
        /// Ask the API for its own figures instead
        #[arg(long)]
        server: bool,
    },
    /// Write students to CSV
    Export {
        /// Output file, or - for stdout
        #[arg(long, default_value = "students.csv")]
        out: PathBuf,
        #[arg(long)]
        search: Option<String>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        five_band: bool,
    },
}

#[derive(Args, Debug, Default)]
struct FieldArgs {
    /// Optional school-issued code, unique per store
    #[arg(long)]
    student_code: Option<String>,
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
    #[arg(long)]
    email: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    date_of_birth: Option<String>,
    #[arg(long)]
    hometown: Option<String>,
    #[arg(long)]
    math: Option<String>,
    #[arg(long)]
    literature: Option<String>,
    #[arg(long)]
    english: Option<String>,
}

impl FieldArgs {
    fn into_values(self) -> Vec<(Field, String)> {
        [
            (Field::StudentCode, self.student_code),
            (Field::FirstName, self.first_name),
            (Field::LastName, self.last_name),
            (Field::Email, self.email),
            (Field::DateOfBirth, self.date_of_birth),
            (Field::Hometown, self.hometown),
            (Field::MathScore, self.math),
            (Field::LiteratureScore, self.literature),
            (Field::EnglishScore, self.english),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|value| (field, value)))
        .collect()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn scheme(five_band: bool) -> BandScheme {
    if five_band {
        BandScheme::FiveBand
    } else {
        BandScheme::FourBand
    }
}

fn format_score(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string())
}

/// Messages for a lookup the user asked for by name. Nothing is refreshed here.
fn lookup_error(error: &StoreError) -> String {
    match error {
        StoreError::NotFound(id) => format!("No student with id {id}."),
        other => other.user_message(),
    }
}

fn print_record(record: &StudentRecord) {
    println!("ID:            {}", record.id);
    println!("Student code:  {}", record.student_code.as_deref().unwrap_or("-"));
    println!("Name:          {}", record.full_name());
    println!("Email:         {}", record.email);
    println!(
        "Date of birth: {}",
        record
            .date_of_birth
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Hometown:      {}", record.hometown);
    for subject in Subject::ALL {
        println!("{:<15}{}", format!("{}:", subject.label()), format_score(record.score(subject)));
    }
    println!("Average:       {}", format_score(record.average_score()));
}

fn confirm_delete(record: &StudentRecord) -> bool {
    eprint!("Delete {} ({})? [y/N] ", record.full_name(), record.email);
    let _ = io::stderr().flush();
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

/// Runs the form to completion, printing field errors when validation stops it.
async fn submit_form(mut form: FormController, values: Vec<(Field, String)>) -> anyhow::Result<()> {
    for (field, value) in values {
        form.set_field(field, value);
    }
    form.submit().await;

    if let FormState::Submitted(record) = form.state() {
        let verb = match form.mode() {
            FormMode::Create => "Added",
            FormMode::Edit(_) => "Updated",
        };
        println!("{verb} {} with id {}.", record.full_name(), record.id);
        return Ok(());
    }

    if let Some(banner) = form.banner() {
        bail!("{banner}");
    }
    for (field, message) in form.errors().iter() {
        eprintln!("  {field}: {message} (got {:?})", form.draft().get(field));
    }
    bail!("{} field(s) need attention", form.errors().len())
}

async fn load_records(state: &AppState, search: Option<String>) -> anyhow::Result<Vec<StudentRecord>> {
    let mut list = state.list_controller();
    if let Some(term) = search {
        list.set_search(term);
    }
    let records = list.refresh().await;
    if let Some(error) = list.error() {
        bail!("{error}");
    }
    Ok(records)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = cli.connection.resolve().context("invalid connection settings")?;
    let backend = Backend::open(&config).await?;
    let mut state = AppState::new(backend.store());

    let mutating = matches!(
        cli.command,
        Commands::Seed
            | Commands::Import { check: false, .. }
            | Commands::Add { .. }
            | Commands::Edit { .. }
            | Commands::Delete { .. }
    );
    if mutating {
        state
            .sign_in(cli.user.as_deref(), cli.password.as_deref())
            .context("sign-in required")?;
    }
    if let Some(session) = state.session() {
        tracing::debug!(email = %session.email, backend = backend.name(), "session opened");
    }

    match cli.command {
        Commands::InitDb => {
            let Backend::Postgres(store) = &backend else {
                bail!("init-db needs --database-url (or DATABASE_URL)");
            };
            store.init_db().await.context("failed to run migrations")?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            state.require_session()?;
            let inserted = bulk::seed(state.store().as_ref()).await.context("seeding failed")?;
            println!("Seeded {inserted} students.");
        }
        Commands::Import { csv, check } => {
            let file = std::fs::File::open(&csv).with_context(|| format!("failed to open {}", csv.display()))?;
            let rows = export::read_drafts(file).with_context(|| format!("failed to read {}", csv.display()))?;

            if check {
                let rejected = bulk::check_rows(&rows);
                println!(
                    "Checked {} rows from {} ({} invalid).",
                    rows.len(),
                    csv.display(),
                    rejected.len()
                );
                for row in &rejected {
                    println!("- line {}: {}", row.line, row.errors);
                }
                return Ok(());
            }

            state.require_session()?;
            let report = bulk::import_rows(state.store().as_ref(), rows).await;

            println!(
                "Imported {} students from {} ({} rejected, {} failed).",
                report.created.len(),
                csv.display(),
                report.rejected.len(),
                report.failed.len()
            );
            for rejected in &report.rejected {
                println!("- line {}: {}", rejected.line, rejected.errors);
            }
            for failed in &report.failed {
                println!("- line {}: {}", failed.line, failed.error.user_message());
            }
        }
        Commands::List {
            search,
            sort,
            desc,
            page,
            page_size,
        } => {
            let mut list = state.list_controller();
            if let Some(size) = page_size {
                list = list.with_page_size(size);
            }
            if let Some(term) = search {
                list.set_search(term);
            }
            if let Some(field) = sort {
                // Same as clicking the column header once, or twice for descending.
                list.toggle_sort(field);
                if desc {
                    list.toggle_sort(field);
                }
            }

            list.refresh().await;
            if let Some(error) = list.error() {
                bail!("{error}");
            }
            list.set_page(page);
            let visible = list.visible();

            if visible.is_empty() {
                println!("No students found.");
                return Ok(());
            }

            for record in &visible {
                println!(
                    "{:<38} {:<28} {:<32} {:>6} {:>6} {:>6} {:>6}",
                    record.id,
                    record.full_name(),
                    record.email,
                    format_score(record.math_score),
                    format_score(record.literature_score),
                    format_score(record.english_score),
                    format_score(record.average_score())
                );
            }
            println!(
                "Page {} of {} ({} matching).",
                list.page() + 1,
                list.page_count(),
                list.matching_count()
            );
        }
        Commands::Show { id, code } => {
            let store = state.store();
            let record = match (id, code) {
                (_, Some(code)) => store
                    .get_by_code(&code)
                    .await
                    .map_err(|e| anyhow::anyhow!(lookup_error(&e)))?
                    .with_context(|| format!("No student with code {code}."))?,
                (Some(id), None) => store
                    .get(&StudentId::new(id))
                    .await
                    .map_err(|e| anyhow::anyhow!(lookup_error(&e)))?,
                (None, None) => bail!("give a student id or --code"),
            };
            print_record(&record);
        }
        Commands::Add { fields } => {
            let mut form = state.form_controller();
            form.load_draft(None).await;
            submit_form(form, fields.into_values()).await?;
        }
        Commands::Edit { id, fields } => {
            let mut form = state.form_controller();
            if !form.load_draft(Some(StudentId::new(id))).await {
                bail!("{}", form.banner().unwrap_or("could not load the student"));
            }
            submit_form(form, fields.into_values()).await?;
        }
        Commands::Delete { id, yes } => {
            let mut list = state.list_controller();
            list.refresh().await;
            if let Some(error) = list.error() {
                bail!("{error}");
            }

            let outcome = list
                .request_delete(&StudentId::new(id), |record| yes || confirm_delete(record))
                .await;
            match outcome {
                DeleteOutcome::Deleted(id) => {
                    if list.sync_events() {
                        list.refresh().await;
                    }
                    println!("Deleted {id}. {} students remain.", list.matching_count());
                }
                DeleteOutcome::Cancelled => println!("Cancelled."),
                DeleteOutcome::Failed(error) => {
                    if error.is_retryable() {
                        bail!("{}", error.user_message());
                    }
                    bail!("{}", list.error().unwrap_or("Student not found."));
                }
            }
        }
        Commands::Stats { five_band, server } => {
            if server {
                let Backend::Remote(remote) = &backend else {
                    bail!("--server needs --api-url (or STUDENT_API_URL)");
                };
                let stats = remote
                    .statistics()
                    .await
                    .map_err(|e| anyhow::anyhow!(e.user_message()))?;
                println!("Server statistics for {}:", remote.base_url());
                println!("- Total students: {}", stats.total_students);
                println!("- Math: {}", format_score(stats.avg_math_score));
                println!("- Literature: {}", format_score(stats.avg_literature_score));
                println!("- English: {}", format_score(stats.avg_english_score));
                println!("- Overall: {}", format_score(stats.avg_overall_score));
                return Ok(());
            }

            let records = load_records(&state, None).await?;
            let scheme = scheme(five_band);
            let summary = match analytics::summarize(&records, scheme) {
                Analytics::NoData => {
                    println!("No student data available.");
                    return Ok(());
                }
                Analytics::Summary(summary) => summary,
            };

            println!("Total students: {}", summary.total_students);
            for subject in Subject::ALL {
                println!("- {}: {}", subject.label(), format_score(summary.subject_average(subject)));
            }
            println!("- Overall: {}", format_score(summary.avg_overall_score));
            println!("Performance distribution:");
            for band in scheme.bands() {
                println!("- {}: {}", band.label(), summary.count(*band));
            }
            if summary.unscored > 0 {
                println!("- unscored: {}", summary.unscored);
            }
            println!("Top students:");
            for (rank, student) in analytics::top_students(&records, TOP_STUDENTS).iter().enumerate() {
                println!("{}. {} average {:.2}", rank + 1, student.name, student.average);
            }
        }
        Commands::Export { out, search } => {
            let records = load_records(&state, search).await?;
            if out.as_os_str() == "-" {
                print!("{}", export::to_csv_string(&records).context("failed to render CSV")?);
                eprintln!("Exported {} students.", records.len());
                return Ok(());
            }
            let file = std::fs::File::create(&out).with_context(|| format!("failed to create {}", out.display()))?;
            export::write_csv(file, &records).with_context(|| format!("failed to write {}", out.display()))?;
            println!("Exported {} students to {}.", records.len(), out.display());
        }
        Commands::Report {
            out,
            search,
            five_band,
        } => {
            let scope = search.clone();
            let records = load_records(&state, search).await?;
            let report = report::build_report(scope.as_deref(), &records, scheme(five_band));
            std::fs::write(&out, report).with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
