use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::models::{StudentId, StudentRecord};
use crate::store::{StoreError, StoreEvent, StudentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    FirstName,
    LastName,
    Email,
    DateOfBirth,
    Hometown,
    MathScore,
    LiteratureScore,
    EnglishScore,
    AverageScore,
}

impl SortField {
    const NAMES: [(SortField, &'static str); 10] = [
        (SortField::Id, "id"),
        (SortField::FirstName, "firstName"),
        (SortField::LastName, "lastName"),
        (SortField::Email, "email"),
        (SortField::DateOfBirth, "dateOfBirth"),
        (SortField::Hometown, "hometown"),
        (SortField::MathScore, "mathScore"),
        (SortField::LiteratureScore, "literatureScore"),
        (SortField::EnglishScore, "englishScore"),
        (SortField::AverageScore, "averageScore"),
    ];

    pub fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(field, _)| *field == self)
            .map(|(_, name)| *name)
            .unwrap_or("id")
    }

    fn score(self, record: &StudentRecord) -> Option<f64> {
        match self {
            SortField::MathScore => record.math_score,
            SortField::LiteratureScore => record.literature_score,
            SortField::EnglishScore => record.english_score,
            SortField::AverageScore => record.average_score(),
            _ => None,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(
            self,
            SortField::MathScore | SortField::LiteratureScore | SortField::EnglishScore | SortField::AverageScore
        )
    }

    /// Numeric for scores, lexicographic for text. Absent values sort first.
    pub fn compare(self, a: &StudentRecord, b: &StudentRecord) -> Ordering {
        if self.is_numeric() {
            return match (self.score(a), self.score(b)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                (x, y) => x.is_some().cmp(&y.is_some()),
            };
        }

        match self {
            SortField::Id => a.id.display_cmp(&b.id),
            SortField::FirstName => a.first_name.cmp(&b.first_name),
            SortField::LastName => a.last_name.cmp(&b.last_name),
            SortField::Email => a.email.cmp(&b.email),
            SortField::DateOfBirth => a.date_of_birth.cmp(&b.date_of_birth),
            SortField::Hometown => a.hometown.cmp(&b.hometown),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        Self::NAMES
            .iter()
            .find(|(_, name)| name.to_ascii_lowercase() == normalized)
            .map(|(field, _)| *field)
            .ok_or_else(|| format!("unknown sort field: {value}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// Stable: ties keep their relative order in both directions.
pub fn sort_records(records: &mut [StudentRecord], field: SortField, direction: SortDirection) {
    records.sort_by(|a, b| {
        let ordering = field.compare(a, b);
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

/// Case-insensitive substring match over names, email and hometown.
pub fn matches_search(record: &StudentRecord, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }

    [
        record.first_name.as_str(),
        record.last_name.as_str(),
        record.email.as_str(),
        record.hometown.as_str(),
    ]
    .iter()
    .any(|value| value.to_lowercase().contains(&term))
        || record.full_name().to_lowercase().contains(&term)
}

/// Identifies one refresh; results carrying an outdated ticket are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted(StudentId),
    Cancelled,
    Failed(StoreError),
}

/// Working set for the student list view.
pub struct ListController {
    store: Arc<dyn StudentStore>,
    records: Vec<StudentRecord>,
    search: String,
    sort: Option<(SortField, SortDirection)>,
    page_size: Option<usize>,
    page: usize,
    loading: bool,
    error: Option<String>,
    generation: u64,
    events: Option<broadcast::Receiver<StoreEvent>>,
    stale: bool,
}

impl ListController {
    pub fn new(store: Arc<dyn StudentStore>) -> Self {
        Self {
            store,
            records: Vec::new(),
            search: String::new(),
            sort: None,
            page_size: None,
            page: 0,
            loading: false,
            error: None,
            generation: 0,
            events: None,
            stale: true,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self.clamp_page();
        self
    }

    /// Marks the working set stale whenever the store reports a mutation.
    pub fn watch(&mut self, events: broadcast::Receiver<StoreEvent>) {
        self.events = Some(events);
    }

    /// Drains pending store events; returns whether a refresh is due.
    pub fn sync_events(&mut self) -> bool {
        if let Some(events) = self.events.as_mut() {
            loop {
                match events.try_recv() {
                    Ok(event) => {
                        tracing::debug!(?event, "store changed under list view");
                        self.stale = true;
                    }
                    Err(TryRecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "list view lagged behind store events");
                        self.stale = true;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }
        self.stale
    }

    #[cfg(test)]
    pub fn needs_refresh(&self) -> bool {
        self.stale
    }

    /// Last successfully fetched records, in store order.
    pub fn records(&self) -> &[StudentRecord] {
        &self.records
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[cfg(test)]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    #[cfg(test)]
    pub fn sort(&self) -> Option<(SortField, SortDirection)> {
        self.sort
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        if self.loading {
            tracing::debug!(superseded = self.generation, "refresh still in flight");
        }
        self.generation += 1;
        self.loading = true;
        RefreshTicket {
            generation: self.generation,
        }
    }

    /// Applies a fetch result unless a newer refresh or a cancel superseded it.
    /// A failure keeps the last-known-good records.
    pub fn apply_refresh(&mut self, ticket: RefreshTicket, result: Result<Vec<StudentRecord>, StoreError>) -> bool {
        if ticket.generation != self.generation {
            tracing::debug!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale refresh"
            );
            return false;
        }

        self.loading = false;
        match result {
            Ok(records) => {
                self.records = records;
                self.error = None;
                self.stale = false;
                self.clamp_page();
            }
            Err(e) => {
                e.log("refresh");
                self.error = Some(e.user_message());
            }
        }
        true
    }

    pub async fn refresh(&mut self) -> Vec<StudentRecord> {
        let ticket = self.begin_refresh();
        let store = Arc::clone(&self.store);
        let result = store.list().await;
        self.apply_refresh(ticket, result);
        self.visible()
    }

    /// Navigating away: anything still in flight is ignored when it lands.
    #[cfg(test)]
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.loading = false;
    }

    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
        self.page = 0;
    }

    pub fn set_sort(&mut self, field: SortField, direction: SortDirection) {
        self.sort = Some((field, direction));
    }

    /// Same field flips direction; a new field starts ascending.
    pub fn toggle_sort(&mut self, field: SortField) {
        let direction = match self.sort {
            Some((current, direction)) if current == field => direction.toggled(),
            _ => SortDirection::Asc,
        };
        self.set_sort(field, direction);
    }

    pub fn set_page(&mut self, page: usize) -> usize {
        self.page = page;
        self.clamp_page();
        self.page
    }

    pub fn page_count(&self) -> usize {
        match self.page_size {
            Some(size) => self.matching_count().div_ceil(size).max(1),
            None => 1,
        }
    }

    pub fn matching_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| matches_search(record, &self.search))
            .count()
    }

    /// Search and sort applied, before paging.
    pub fn filtered(&self) -> Vec<StudentRecord> {
        let mut records: Vec<StudentRecord> = self
            .records
            .iter()
            .filter(|record| matches_search(record, &self.search))
            .cloned()
            .collect();

        if let Some((field, direction)) = self.sort {
            sort_records(&mut records, field, direction);
        }
        records
    }

    /// The current page of the working set.
    pub fn visible(&self) -> Vec<StudentRecord> {
        let records = self.filtered();
        match self.page_size {
            Some(size) => records.into_iter().skip(self.page * size).take(size).collect(),
            None => records,
        }
    }

    /// Deletes after `confirm` approves the targeted record. Ids outside the
    /// working set are looked up in the store first. The working set only
    /// changes when the store reports success.
    pub async fn request_delete<F>(&mut self, id: &StudentId, confirm: F) -> DeleteOutcome
    where
        F: FnOnce(&StudentRecord) -> bool,
    {
        let store = Arc::clone(&self.store);
        let confirmed = match self.records.iter().find(|record| &record.id == id) {
            Some(record) => confirm(record),
            None => match store.get(id).await {
                Ok(record) => confirm(&record),
                Err(StoreError::NotFound(_)) => return self.delete_not_found(id).await,
                Err(e) => {
                    e.log("delete");
                    self.error = Some(e.user_message());
                    return DeleteOutcome::Failed(e);
                }
            },
        };
        if !confirmed {
            return DeleteOutcome::Cancelled;
        }

        match store.delete(id).await {
            Ok(()) => {
                self.records.retain(|record| &record.id != id);
                self.error = None;
                self.clamp_page();
                tracing::info!(%id, "student deleted");
                DeleteOutcome::Deleted(id.clone())
            }
            Err(StoreError::NotFound(_)) => self.delete_not_found(id).await,
            Err(e) => {
                e.log("delete");
                self.error = Some(e.user_message());
                DeleteOutcome::Failed(e)
            }
        }
    }

    async fn delete_not_found(&mut self, id: &StudentId) -> DeleteOutcome {
        let error = StoreError::NotFound(id.clone());
        error.log("delete");
        self.refresh().await;
        if self.error.is_none() {
            self.error = Some(error.user_message());
        }
        DeleteOutcome::Failed(error)
    }

    fn clamp_page(&mut self) {
        let last = self.page_count().saturating_sub(1);
        if self.page > last {
            self.page = last;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{fields, FlakyStore};
    use crate::store::{MemoryStore, ObservedStore};

    async fn seeded(entries: &[(&str, f64)]) -> Arc<FlakyStore> {
        let store = Arc::new(FlakyStore::default());
        for (name, math) in entries {
            store.inner.create(fields(name, *math, 5.0, 5.0)).await.unwrap();
        }
        store
    }

    fn names(records: &[StudentRecord]) -> Vec<String> {
        records.iter().map(|record| record.first_name.clone()).collect()
    }

    #[tokio::test]
    async fn refresh_loads_the_working_set() {
        let store = seeded(&[("An", 8.0), ("Binh", 6.0)]).await;
        let mut list = ListController::new(store);
        assert!(list.needs_refresh());

        let visible = list.refresh().await;
        assert_eq!(names(&visible), ["An", "Binh"]);
        assert!(!list.is_loading());
        assert!(!list.needs_refresh());
        assert_eq!(list.error(), None);
    }

    #[tokio::test]
    async fn search_is_case_insensitive_across_text_fields() {
        let store = seeded(&[("An", 8.0), ("Binh", 6.0), ("Cuong", 7.0)]).await;
        let mut list = ListController::new(store);
        list.refresh().await;

        list.set_search("BINH");
        assert_eq!(names(&list.visible()), ["Binh"]);

        list.set_search("da nang");
        assert_eq!(list.visible().len(), 3);

        list.set_search("cuong@EXAMPLE");
        assert_eq!(names(&list.visible()), ["Cuong"]);

        list.set_search("an nguyen");
        assert_eq!(names(&list.visible()), ["An"]);

        list.set_search("zzz");
        assert!(list.visible().is_empty());
    }

    #[tokio::test]
    async fn score_sort_is_numeric_and_desc_is_non_increasing() {
        let store = seeded(&[("An", 9.0), ("Binh", 10.0), ("Cuong", 2.5), ("Dung", 7.0)]).await;
        let mut list = ListController::new(store);
        list.refresh().await;

        list.set_sort(SortField::MathScore, SortDirection::Desc);
        let scores: Vec<f64> = list.visible().iter().filter_map(|r| r.math_score).collect();
        assert_eq!(scores, [10.0, 9.0, 7.0, 2.5]);
        assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));

        list.set_sort(SortField::MathScore, SortDirection::Asc);
        let ascending = names(&list.visible());
        list.set_sort(SortField::MathScore, SortDirection::Desc);
        let mut descending = names(&list.visible());
        descending.reverse();
        assert_eq!(ascending, descending);
    }

    #[tokio::test]
    async fn ties_keep_their_original_order() {
        let store = seeded(&[("An", 7.0), ("Binh", 9.0), ("Cuong", 7.0), ("Dung", 7.0)]).await;
        let mut list = ListController::new(store);
        list.refresh().await;

        list.set_sort(SortField::MathScore, SortDirection::Asc);
        assert_eq!(names(&list.visible()), ["An", "Cuong", "Dung", "Binh"]);

        list.set_sort(SortField::MathScore, SortDirection::Desc);
        assert_eq!(names(&list.visible()), ["Binh", "An", "Cuong", "Dung"]);
    }

    #[tokio::test]
    async fn text_sort_is_lexicographic_and_toggle_flips_direction() {
        let store = seeded(&[("Cuong", 1.0), ("An", 2.0), ("Binh", 3.0)]).await;
        let mut list = ListController::new(store);
        list.refresh().await;

        list.toggle_sort(SortField::FirstName);
        assert_eq!(names(&list.visible()), ["An", "Binh", "Cuong"]);
        list.toggle_sort(SortField::FirstName);
        assert_eq!(names(&list.visible()), ["Cuong", "Binh", "An"]);
        list.toggle_sort(SortField::MathScore);
        assert_eq!(list.sort(), Some((SortField::MathScore, SortDirection::Asc)));
    }

    #[tokio::test]
    async fn page_index_clamps_and_reclamps_after_delete() {
        let store = seeded(&[("An", 1.0), ("Binh", 2.0), ("Cuong", 3.0), ("Dung", 4.0), ("Em", 5.0)]).await;
        let mut list = ListController::new(store.clone()).with_page_size(2);
        list.refresh().await;

        assert_eq!(list.page_count(), 3);
        assert_eq!(list.set_page(10), 2);
        assert_eq!(names(&list.visible()), ["Em"]);

        let last = list.visible()[0].id.clone();
        let outcome = list.request_delete(&last, |_| true).await;
        assert_eq!(outcome, DeleteOutcome::Deleted(last.clone()));
        assert_eq!(list.page(), 1);
        assert_eq!(names(&list.visible()), ["Cuong", "Dung"]);
        assert!(store.inner.get(&last).await.is_err());
    }

    #[tokio::test]
    async fn empty_working_set_has_one_empty_page() {
        let mut list = ListController::new(Arc::new(MemoryStore::new())).with_page_size(3);
        list.refresh().await;
        assert_eq!(list.page_count(), 1);
        assert_eq!(list.set_page(4), 0);
        assert!(list.visible().is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_known_good_records() {
        let store = seeded(&[("An", 8.0), ("Binh", 6.0)]).await;
        let mut list = ListController::new(store.clone());
        list.refresh().await;

        store.set_failing(true);
        let visible = list.refresh().await;
        assert_eq!(names(&visible), ["An", "Binh"]);
        assert!(list.error().is_some());
        assert!(!list.is_loading());

        store.set_failing(false);
        list.refresh().await;
        assert_eq!(list.error(), None);
    }

    #[tokio::test]
    async fn stale_and_cancelled_refreshes_are_discarded() {
        let store = seeded(&[("An", 8.0)]).await;
        let mut list = ListController::new(store.clone());

        let first = list.begin_refresh();
        let second = list.begin_refresh();
        let newest = store.list().await;
        assert!(list.apply_refresh(second, newest));

        let outdated = Ok(Vec::new());
        assert!(!list.apply_refresh(first, outdated));
        assert_eq!(names(list.records()), ["An"]);

        let ticket = list.begin_refresh();
        list.cancel();
        assert!(!list.apply_refresh(ticket, Ok(Vec::new())));
        assert_eq!(list.records().len(), 1);
        assert!(!list.is_loading());
    }

    #[tokio::test]
    async fn declined_confirmation_leaves_everything_alone() {
        let store = seeded(&[("An", 8.0)]).await;
        let mut list = ListController::new(store.clone());
        list.refresh().await;

        let id = list.records()[0].id.clone();
        let outcome = list.request_delete(&id, |record| record.first_name != "An").await;
        assert_eq!(outcome, DeleteOutcome::Cancelled);
        assert_eq!(list.records().len(), 1);
        assert!(store.inner.get(&id).await.is_ok());
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_record_and_reports() {
        let store = seeded(&[("An", 8.0)]).await;
        let mut list = ListController::new(store.clone());
        list.refresh().await;

        store.set_failing(true);
        let id = list.records()[0].id.clone();
        let outcome = list.request_delete(&id, |_| true).await;
        assert!(matches!(outcome, DeleteOutcome::Failed(StoreError::RequestFailed(_))));
        assert_eq!(list.records().len(), 1);
        assert!(list.error().is_some());
    }

    #[tokio::test]
    async fn deleting_a_vanished_record_reports_and_refreshes() {
        let store = seeded(&[("An", 8.0), ("Binh", 6.0)]).await;
        let mut list = ListController::new(store.clone());
        list.refresh().await;

        let id = list.records()[0].id.clone();
        store.inner.delete(&id).await.unwrap();

        let outcome = list.request_delete(&id, |_| true).await;
        assert_eq!(outcome, DeleteOutcome::Failed(StoreError::NotFound(id.clone())));
        assert_eq!(names(list.records()), ["Binh"]);
        assert_eq!(list.error(), Some(StoreError::NotFound(id).user_message().as_str()));
    }

    #[tokio::test]
    async fn deleting_a_record_outside_the_working_set_reaches_the_store() {
        let store = seeded(&[("An", 8.0)]).await;
        let mut list = ListController::new(store.clone());
        list.refresh().await;

        let added = store.inner.create(fields("Binh", 6.0, 6.0, 6.0)).await.unwrap();
        let mut confirmed = None;
        let outcome = list
            .request_delete(&added.id, |record| {
                confirmed = Some(record.first_name.clone());
                true
            })
            .await;

        assert_eq!(outcome, DeleteOutcome::Deleted(added.id.clone()));
        assert_eq!(confirmed.as_deref(), Some("Binh"));
        assert_eq!(store.inner.get(&added.id).await, Err(StoreError::NotFound(added.id.clone())));
        assert_eq!(names(list.records()), ["An"]);
        assert_eq!(list.error(), None);

        let unknown = StudentId::new("missing");
        let outcome = list.request_delete(&unknown, |_| true).await;
        assert_eq!(outcome, DeleteOutcome::Failed(StoreError::NotFound(unknown)));
    }

    #[tokio::test]
    async fn store_events_mark_the_view_stale() {
        let observed = Arc::new(ObservedStore::new(Arc::new(MemoryStore::new())));
        let mut list = ListController::new(observed.clone());
        list.watch(observed.subscribe());
        list.refresh().await;
        assert!(!list.sync_events());

        observed.create(fields("An", 8.0, 8.0, 8.0)).await.unwrap();
        assert!(list.sync_events());

        list.refresh().await;
        assert!(!list.sync_events());
        assert_eq!(list.records().len(), 1);
    }

    #[test]
    fn sort_field_names_parse() {
        assert_eq!("mathScore".parse::<SortField>(), Ok(SortField::MathScore));
        assert_eq!("last-name".parse::<SortField>(), Ok(SortField::LastName));
        assert_eq!("average_score".parse::<SortField>(), Ok(SortField::AverageScore));
        assert!("height".parse::<SortField>().is_err());
    }
}
