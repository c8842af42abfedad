use std::sync::Arc;

use crate::models::{Field, StudentDraft, StudentId, StudentRecord};
use crate::store::{StoreError, StudentStore};
use crate::validate::{self, FieldErrors};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit(StudentId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormState {
    Editing,
    Submitted(StudentRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

/// Editable draft of one student plus its submission lifecycle.
pub struct FormController {
    store: Arc<dyn StudentStore>,
    mode: FormMode,
    draft: StudentDraft,
    errors: FieldErrors,
    banner: Option<String>,
    state: FormState,
    loading: bool,
    generation: u64,
}

impl FormController {
    pub fn new(store: Arc<dyn StudentStore>) -> Self {
        Self {
            store,
            mode: FormMode::Create,
            draft: StudentDraft::default(),
            errors: FieldErrors::default(),
            banner: None,
            state: FormState::Editing,
            loading: false,
            generation: 0,
        }
    }

    pub fn mode(&self) -> &FormMode {
        &self.mode
    }

    pub fn draft(&self) -> &StudentDraft {
        &self.draft
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    #[cfg(test)]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Starts blank for creation, or fetches the record to edit.
    /// Returns whether the draft is ready for editing.
    pub async fn load_draft(&mut self, id: Option<StudentId>) -> bool {
        let Some(id) = id else {
            self.reset(FormMode::Create);
            return true;
        };

        let ticket = self.begin_load(id.clone());
        let store = Arc::clone(&self.store);
        let result = store.get(&id).await;
        self.apply_load(ticket, result) && self.banner.is_none()
    }

    pub fn begin_load(&mut self, id: StudentId) -> LoadTicket {
        if self.loading {
            tracing::debug!(superseded = self.generation, "load still in flight");
        }
        self.reset(FormMode::Edit(id));
        self.loading = true;
        LoadTicket {
            generation: self.generation,
        }
    }

    /// Returns false when the load was superseded and its result dropped.
    pub fn apply_load(&mut self, ticket: LoadTicket, result: Result<StudentRecord, StoreError>) -> bool {
        if ticket.generation != self.generation {
            tracing::debug!(ticket = ticket.generation, current = self.generation, "discarding stale load");
            return false;
        }

        self.loading = false;
        match result {
            Ok(record) => self.draft = StudentDraft::from_record(&record),
            Err(e) => {
                e.log("load");
                self.banner = Some(match e {
                    StoreError::NotFound(_) => "This student no longer exists.".to_string(),
                    other => other.user_message(),
                });
            }
        }
        true
    }

    #[cfg(test)]
    /// Navigating away: in-flight loads are ignored when they land.
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.loading = false;
    }

    pub fn set_field(&mut self, field: Field, value: impl Into<String>) {
        self.draft.set(field, value);
        self.errors.remove(field);
    }

    /// Validates, then creates or updates. Invalid drafts never reach the store,
    /// and a store failure keeps the draft for another attempt.
    pub async fn submit(&mut self) -> &FormState {
        if matches!(self.state, FormState::Submitted(_)) {
            return &self.state;
        }

        let fields = match validate::parse(&self.draft) {
            Ok(fields) => fields,
            Err(errors) => {
                tracing::debug!(count = errors.len(), "draft rejected by validation");
                self.errors = errors;
                return &self.state;
            }
        };
        self.errors.clear();

        let store = Arc::clone(&self.store);
        let result = match &self.mode {
            FormMode::Create => store.create(fields).await,
            FormMode::Edit(id) => store.update(id, fields).await,
        };

        match result {
            Ok(record) => {
                tracing::info!(id = %record.id, "student saved");
                self.banner = None;
                self.state = FormState::Submitted(record);
            }
            Err(e) => {
                e.log("submit");
                self.banner = Some(match e {
                    StoreError::NotFound(_) => "This student no longer exists.".to_string(),
                    other => other.user_message(),
                });
            }
        }
        &self.state
    }

    fn reset(&mut self, mode: FormMode) {
        self.generation += 1;
        self.mode = mode;
        self.draft = StudentDraft::default();
        self.errors.clear();
        self.banner = None;
        self.state = FormState::Editing;
        self.loading = false;
    }
}
