use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use super::{StoreError, StudentStore};
use crate::models::{StudentFields, StudentId, StudentRecord};

const STUDENT_COLUMNS: &str = "id, student_code, first_name, last_name, email, date_of_birth, \
     hometown, math_score, literature_score, english_score";

/// Postgres-backed store for server-side deployments.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::RequestFailed(format!("failed to connect to Postgres: {e}")))?;
        Ok(Self::new(pool))
    }

    pub async fn init_db(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("running migrations: {e}")))?;
        Ok(())
    }
}

fn storage(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::RequestFailed(e.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Rejected(format!("student code already exists ({})", db.message()))
        }
        other => StoreError::Storage(other.to_string()),
    }
}

fn row_to_record(row: &PgRow) -> Result<StudentRecord, StoreError> {
    Ok(StudentRecord {
        id: StudentId::new(row.try_get::<String, _>("id").map_err(storage)?),
        student_code: row.try_get("student_code").map_err(storage)?,
        first_name: row.try_get("first_name").map_err(storage)?,
        last_name: row.try_get("last_name").map_err(storage)?,
        email: row.try_get("email").map_err(storage)?,
        date_of_birth: row.try_get("date_of_birth").map_err(storage)?,
        hometown: row.try_get("hometown").map_err(storage)?,
        math_score: row.try_get("math_score").map_err(storage)?,
        literature_score: row.try_get("literature_score").map_err(storage)?,
        english_score: row.try_get("english_score").map_err(storage)?,
    })
}

#[async_trait]
impl StudentStore for PgStore {
    async fn list(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let query = format!(
            "SELECT {STUDENT_COLUMNS} FROM student_records.students ORDER BY created_at, id"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await.map_err(storage)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn get(&self, id: &StudentId) -> Result<StudentRecord, StoreError> {
        let query = format!("SELECT {STUDENT_COLUMNS} FROM student_records.students WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        row_to_record(&row)
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<StudentRecord>, StoreError> {
        let query = format!("SELECT {STUDENT_COLUMNS} FROM student_records.students WHERE student_code = $1");
        let row = sqlx::query(&query)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn create(&self, fields: StudentFields) -> Result<StudentRecord, StoreError> {
        let query = format!(
            r#"
            INSERT INTO student_records.students
            (id, first_name, last_name, email, date_of_birth, hometown,
             math_score, literature_score, english_score, student_code)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {STUDENT_COLUMNS}
            "#
        );
        let id = StudentId::generate();
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .bind(&fields.first_name)
            .bind(&fields.last_name)
            .bind(&fields.email)
            .bind(fields.date_of_birth)
            .bind(&fields.hometown)
            .bind(fields.math_score)
            .bind(fields.literature_score)
            .bind(fields.english_score)
            .bind(fields.student_code.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        let record = row_to_record(&row)?;
        tracing::info!(id = %record.id, "inserted student");
        Ok(record)
    }

    async fn update(&self, id: &StudentId, fields: StudentFields) -> Result<StudentRecord, StoreError> {
        let query = format!(
            r#"
            UPDATE student_records.students
            SET first_name = $2, last_name = $3, email = $4, date_of_birth = $5,
                hometown = $6, math_score = $7, literature_score = $8,
                english_score = $9, student_code = $10, updated_at = now()
            WHERE id = $1
            RETURNING {STUDENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .bind(&fields.first_name)
            .bind(&fields.last_name)
            .bind(&fields.email)
            .bind(fields.date_of_birth)
            .bind(&fields.hometown)
            .bind(fields.math_score)
            .bind(fields.literature_score)
            .bind(fields.english_score)
            .bind(fields.student_code.as_deref())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        row_to_record(&row)
    }

    async fn delete(&self, id: &StudentId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM student_records.students WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }
}
