//! The authoritative student collection and its interchangeable backends.
//!
//! Consumers receive an `Arc<dyn StudentStore>` at construction; nothing
//! mutates records except through this trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{StudentFields, StudentId, StudentRecord};

pub mod memory;
pub mod observed;
pub mod postgres;
pub mod remote;

pub use memory::MemoryStore;
pub use observed::{ObservedStore, StoreEvent};
pub use postgres::PgStore;
pub use remote::RemoteStore;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("student {0} not found")]
    NotFound(StudentId),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("malformed response body: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The request was understood and refused, e.g. a duplicate student code.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The write was acknowledged but the stored record could not be read back.
    #[error("write not confirmed: {0}")]
    Unconfirmed(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::RequestFailed(_) | StoreError::Parse(_) | StoreError::Storage(_)
        )
    }

    /// Text shown to the user. Parse failures read exactly like transport failures.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::NotFound(_) => "Student not found. The list has been refreshed.".to_string(),
            StoreError::RequestFailed(_) | StoreError::Parse(_) => {
                "Could not reach the student service. Please try again.".to_string()
            }
            StoreError::Storage(_) => "Could not save student data. Please try again.".to_string(),
            StoreError::Rejected(detail) => format!("The student was not saved: {detail}"),
            StoreError::Unconfirmed(_) => {
                "The student was saved but could not be read back. Refresh the list before trying again."
                    .to_string()
            }
        }
    }

    /// Logs at a level that keeps malformed bodies distinguishable from
    /// plain transport failures.
    pub fn log(&self, operation: &str) {
        match self {
            StoreError::NotFound(id) => tracing::info!(%id, operation, "student not found"),
            StoreError::Parse(detail) => {
                tracing::error!(target: "student_records::wire", operation, %detail, "unparsable response")
            }
            StoreError::RequestFailed(detail) => tracing::warn!(operation, %detail, "request failed"),
            StoreError::Storage(detail) => tracing::error!(operation, %detail, "storage failure"),
            StoreError::Rejected(detail) => tracing::warn!(operation, %detail, "request rejected"),
            StoreError::Unconfirmed(detail) => tracing::warn!(operation, %detail, "write not confirmed"),
        }
    }
}

#[async_trait]
pub trait StudentStore: Send + Sync {
    async fn list(&self) -> Result<Vec<StudentRecord>, StoreError>;

    async fn get(&self, id: &StudentId) -> Result<StudentRecord, StoreError>;

    /// `None` when no record carries that student code.
    async fn get_by_code(&self, code: &str) -> Result<Option<StudentRecord>, StoreError>;

    /// Assigns the id.
    async fn create(&self, fields: StudentFields) -> Result<StudentRecord, StoreError>;

    /// Replaces in place; the id never changes.
    async fn update(&self, id: &StudentId, fields: StudentFields) -> Result<StudentRecord, StoreError>;

    async fn delete(&self, id: &StudentId) -> Result<(), StoreError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_transport_failures_look_the_same_to_users() {
        let parse = StoreError::Parse("unexpected eof".to_string());
        let transport = StoreError::RequestFailed("timeout".to_string());
        assert_eq!(parse.user_message(), transport.user_message());
        assert!(parse.is_retryable());
        assert!(!StoreError::NotFound(StudentId::new("7")).is_retryable());
        assert!(!StoreError::Rejected("duplicate".to_string()).is_retryable());
        assert!(!StoreError::Unconfirmed("no body".to_string()).is_retryable());
    }
}
