//! Sign-in and the shared application state handed to every command.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::form::FormController;
use crate::list::ListController;
use crate::store::{ObservedStore, StoreEvent, StudentStore};

pub const DEMO_EMAIL: &str = "admin@example.com";
pub const DEMO_PASSWORD: &str = "password";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub email: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("sign in with --user and --password (or STUDENT_USER / STUDENT_PASSWORD)")]
    MissingCredentials,
    #[error("Invalid email or password")]
    InvalidCredentials,
}

/// Hardcoded demo account check. There is no other authentication.
pub fn login(email: Option<&str>, password: Option<&str>) -> Result<Session, LoginError> {
    let (Some(email), Some(password)) = (email, password) else {
        return Err(LoginError::MissingCredentials);
    };

    let email = email.trim();
    if email.eq_ignore_ascii_case(DEMO_EMAIL) && password == DEMO_PASSWORD {
        tracing::debug!(email, "signed in");
        Ok(Session {
            email: DEMO_EMAIL.to_string(),
        })
    } else {
        tracing::warn!(email, "rejected sign-in");
        Err(LoginError::InvalidCredentials)
    }
}

pub struct AppState {
    store: Arc<ObservedStore>,
    session: Option<Session>,
}

impl AppState {
    pub fn new(backend: Arc<dyn StudentStore>) -> Self {
        Self {
            store: Arc::new(ObservedStore::new(backend)),
            session: None,
        }
    }

    pub fn store(&self) -> Arc<dyn StudentStore> {
        self.store.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn sign_in(&mut self, email: Option<&str>, password: Option<&str>) -> Result<&Session, LoginError> {
        let session = login(email, password)?;
        Ok(self.session.insert(session))
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn require_session(&self) -> Result<&Session, LoginError> {
        self.session.as_ref().ok_or(LoginError::MissingCredentials)
    }

    /// A list view that goes stale whenever this state's store is mutated.
    pub fn list_controller(&self) -> ListController {
        let mut list = ListController::new(self.store());
        list.watch(self.subscribe());
        list
    }

    pub fn form_controller(&self) -> FormController {
        FormController::new(self.store())
    }
}
