//! HTTP-backed student store.
//!
//! Operations map onto the `/api` resources. `list` walks the server's pages
//! until a short page arrives. Transport failures, timeouts and unexpected
//! statuses surface as [`StoreError::RequestFailed`]; 404 on an addressed
//! record is [`StoreError::NotFound`]; 400, 409 and 422 are
//! [`StoreError::Rejected`]; bodies that cannot be decoded are
//! [`StoreError::Parse`]. A create the server acknowledged without echoing the
//! row is read back by student code, and reported as
//! [`StoreError::Unconfirmed`] when that fails.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;

use super::{StoreError, StudentStore};
use crate::models::{Page, StudentFields, StudentId, StudentRecord};
use crate::wire::{self, BodyFormat, RequestFields, ServerStatistics};

const USER_AGENT: &str = concat!("student-records/", env!("CARGO_PKG_VERSION"));
const ACCEPTED_BODIES: &str = "application/json, application/xml;q=0.9";
/// Both student APIs cap `limit` at 100 by default.
pub const PAGE_LIMIT: usize = 100;

/// Server-side filtering and paging for `GET /students`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub search: Option<String>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl ListQuery {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(search) = self.search.as_deref().filter(|term| !term.is_empty()) {
            pairs.push(("search", search.to_string()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("skip", skip.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

pub struct RemoteStore {
    http_client: reqwest::Client,
    base_url: String,
    request_fields: RequestFields,
}

impl RemoteStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::RequestFailed(format!("building http client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            http_client,
            base_url,
            request_fields: RequestFields::default(),
        })
    }

    pub fn with_request_fields(mut self, request_fields: RequestFields) -> Self {
        self.request_fields = request_fields;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn record_url(&self, id: &StudentId) -> String {
        self.url(&format!("/students/{id}"))
    }

    fn code_url(&self, code: &str) -> String {
        match self.request_fields {
            RequestFields::Vietnamese => self.url(&format!("/students/ma-so/{code}")),
            RequestFields::English => self.url(&format!("/students/{code}")),
        }
    }

    pub async fn fetch_page(&self, query: &ListQuery) -> Result<Page, StoreError> {
        let request = self.http_client.get(self.url("/students")).query(&query.pairs());
        let body = self.send(request, None).await?;
        wire::decode_page(body)
    }

    pub async fn statistics(&self) -> Result<ServerStatistics, StoreError> {
        let request = self.http_client.get(self.url("/statistics"));
        let body = self.send(request, None).await?;
        wire::decode_statistics(body)
    }

    async fn send(&self, request: RequestBuilder, id: Option<&StudentId>) -> Result<Value, StoreError> {
        let response = self.dispatch(request, id).await?;
        let format = BodyFormat::from_content_type(
            response.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
        );
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::RequestFailed(format!("reading response body: {e}")))?;
        wire::parse_body(format, &body)
    }

    async fn dispatch(&self, request: RequestBuilder, id: Option<&StudentId>) -> Result<Response, StoreError> {
        let response = request
            .header(ACCEPT, ACCEPTED_BODIES)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StoreError::RequestFailed(format!("timed out: {e}"))
                } else {
                    StoreError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        tracing::debug!(url = %response.url(), status = status.as_u16(), "student api response");

        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(StoreError::NotFound(id.clone()));
            }
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = error_detail(&text);
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                    StoreError::Rejected(detail)
                }
                _ => StoreError::RequestFailed(format!("{status}: {detail}")),
            });
        }

        Ok(response)
    }

    /// Finds a row the server stored without echoing it back, by code first and then by email.
    async fn read_back_created(&self, code: &str, email: &str) -> Result<StudentRecord, StoreError> {
        match self.get_by_code(code).await {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => {}
            Err(e) => tracing::debug!(code, error = %e, "student code lookup failed"),
        }

        let records = self
            .list()
            .await
            .map_err(|e| StoreError::Unconfirmed(format!("reading back student {code}: {e}")))?;
        let by_code = records
            .iter()
            .rev()
            .find(|record| record.student_code.as_deref() == Some(code));
        let by_email = || records.iter().rev().find(|record| record.email.eq_ignore_ascii_case(email));
        by_code
            .or_else(by_email)
            .cloned()
            .ok_or_else(|| StoreError::Unconfirmed(format!("student {code} is not listed by the server")))
    }
}

/// Both student APIs require a code on create.
fn generate_code() -> String {
    let id = StudentId::generate();
    let digits: String = id.as_str().chars().filter(|c| *c != '-').take(10).collect();
    format!("SV{}", digits.to_ascii_uppercase())
}

/// Pulls `detail`/`message` out of an error body when there is one.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().chars().take(200).collect())
}

#[async_trait]
impl StudentStore for RemoteStore {
    async fn list(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut skip = 0;

        loop {
            let query = ListQuery {
                search: None,
                skip: Some(skip),
                limit: Some(PAGE_LIMIT),
            };
            let page = self.fetch_page(&query).await?;
            let received = page.items.len();
            let total_count = page.total_count;
            let before = records.len();
            for record in page.items {
                if seen.insert(record.id.clone()) {
                    records.push(record);
                }
            }
            skip += received;

            // A page that is not exactly full means the server has no more, or ignores paging.
            let last_page = received != PAGE_LIMIT || records.len() == before;
            let reached_total = total_count > received && records.len() >= total_count;
            if last_page || reached_total {
                break;
            }
        }

        tracing::debug!(count = records.len(), "listed students remotely");
        Ok(records)
    }

    async fn get(&self, id: &StudentId) -> Result<StudentRecord, StoreError> {
        let request = self.http_client.get(self.record_url(id));
        let body = self.send(request, Some(id)).await?;
        wire::decode_record(body)
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<StudentRecord>, StoreError> {
        let key = StudentId::new(code);
        let request = self.http_client.get(self.code_url(code));
        match self.send(request, Some(&key)).await {
            Ok(body) => wire::decode_optional_record(body),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, mut fields: StudentFields) -> Result<StudentRecord, StoreError> {
        let code = fields.student_code.get_or_insert_with(generate_code).clone();
        let body = wire::encode_fields(&fields, self.request_fields);
        let request = self.http_client.post(self.url("/students")).json(&body);

        // After a 2xx the row exists: nothing past this point may be retryable.
        let record = match self.send(request, None).await.and_then(wire::decode_optional_record) {
            Ok(Some(record)) => record,
            Ok(None) => self.read_back_created(&code, &fields.email).await?,
            Err(StoreError::Parse(detail)) => {
                tracing::warn!(code = %code, %detail, "create acknowledged with an unreadable body");
                self.read_back_created(&code, &fields.email).await?
            }
            Err(e) => return Err(e),
        };
        tracing::info!(id = %record.id, code = %code, "created student remotely");
        Ok(record)
    }

    async fn update(&self, id: &StudentId, fields: StudentFields) -> Result<StudentRecord, StoreError> {
        let body = wire::encode_fields(&fields, self.request_fields);
        let request = self.http_client.put(self.record_url(id)).json(&body);
        let body = self.send(request, Some(id)).await?;
        let mut record = match wire::decode_optional_record(body)? {
            Some(record) => record,
            None => self.get(id).await?,
        };
        // The addressed id is authoritative even if the body echoes another form of it.
        record.id = id.clone();
        Ok(record)
    }

    async fn delete(&self, id: &StudentId) -> Result<(), StoreError> {
        let request = self.http_client.delete(self.record_url(id));
        self.dispatch(request, Some(id)).await?;
        tracing::info!(%id, "deleted student remotely");
        Ok(())
    }
}
