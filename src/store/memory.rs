use super::{
    Cursor, ListingCoverage, MutationOutcome, Page, RemoteStore, StoreError, StoreResult,
};
use crate::reconcile::models::{Record, RecordError, Scope};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

/// Mutation calls observed by an [`InMemoryStore`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Delete { scope: String, ids: Vec<String> },
    Upsert { scope: String, ids: Vec<String> },
}

#[derive(Debug, Default)]
struct State {
    scopes: HashMap<String, Vec<Record>>,
    calls: Vec<StoreCall>,
    list_calls: usize,
}

/// Ordered in-memory store keyed by scope key.
///
/// Pages are served `page_size` at a time. With `page_overlap` each page
/// repeats the tail of the previous one, which mimics query-sweep listings.
/// Failure injection lets callers rehearse partial runs.
#[derive(Debug)]
pub struct InMemoryStore {
    name: String,
    page_size: usize,
    page_overlap: usize,
    coverage: ListingCoverage,
    state: Mutex<State>,
    failing_batches: HashSet<String>,
    failing_records: HashSet<String>,
    failing_list_page: Option<usize>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            name: "memory".to_string(),
            page_size: 100,
            page_overlap: 0,
            coverage: ListingCoverage::Exhaustive,
            state: Mutex::new(State::default()),
            failing_batches: HashSet::new(),
            failing_records: HashSet::new(),
            failing_list_page: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_page_overlap(mut self, overlap: usize) -> Self {
        self.page_overlap = overlap;
        self
    }

    pub fn with_coverage(mut self, coverage: ListingCoverage) -> Self {
        self.coverage = coverage;
        self
    }

    /// Any bulk call containing `id` fails as a whole.
    pub fn fail_batch_containing(mut self, id: impl Into<String>) -> Self {
        self.failing_batches.insert(id.into());
        self
    }

    /// `id` is reported as a per-record failure; the rest of its batch lands.
    pub fn fail_record(mut self, id: impl Into<String>) -> Self {
        self.failing_records.insert(id.into());
        self
    }

    /// The `page`-th list call (zero-based) fails.
    pub fn fail_list_page(mut self, page: usize) -> Self {
        self.failing_list_page = Some(page);
        self
    }

    pub fn with_records(self, scope_key: &str, records: Vec<Record>) -> Self {
        self.insert(scope_key, records);
        self
    }

    pub fn insert(&self, scope_key: &str, records: Vec<Record>) {
        let mut state = self.lock();
        let stored = state.scopes.entry(scope_key.to_string()).or_default();
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
        }
    }

    pub fn records(&self, scope_key: &str) -> Vec<Record> {
        self.lock()
            .scopes
            .get(scope_key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn ids(&self, scope_key: &str) -> Vec<String> {
        self.records(scope_key).into_iter().map(|r| r.id).collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_batch(&self, ids: &[String]) -> StoreResult<()> {
        if let Some(id) = ids.iter().find(|id| self.failing_batches.contains(*id)) {
            return Err(StoreError::Unavailable(format!(
                "injected batch failure on {id}"
            )));
        }
        Ok(())
    }

    fn record_failures(&self, ids: &[String]) -> Vec<RecordError> {
        ids.iter()
            .filter(|id| self.failing_records.contains(*id))
            .map(|id| RecordError::new(id.clone(), "injected record failure"))
            .collect()
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn coverage(&self) -> ListingCoverage {
        self.coverage
    }

    async fn list(&self, scope: &Scope, cursor: Option<&Cursor>) -> StoreResult<Page> {
        let mut state = self.lock();
        let call = state.list_calls;
        state.list_calls += 1;

        if self.failing_list_page == Some(call) {
            return Err(StoreError::Unavailable(format!(
                "injected list failure on page {call}"
            )));
        }

        let records = state
            .scopes
            .get(&scope.key)
            .ok_or_else(|| StoreError::ScopeNotFound(scope.key.clone()))?;

        let offset = match cursor {
            Some(cursor) => cursor
                .as_str()
                .parse::<usize>()
                .map_err(|e| StoreError::Decode(format!("bad cursor {cursor}: {e}")))?,
            None => 0,
        };
        let start = offset.saturating_sub(self.page_overlap).min(records.len());
        let end = (offset + self.page_size).min(records.len());
        let items = records[start..end].to_vec();
        let next_cursor = (end < records.len()).then(|| Cursor::new(end.to_string()));

        debug!(scope = %scope, start, end, "Served in-memory page");
        Ok(Page { items, next_cursor })
    }

    async fn fetch(&self, scope: &Scope, ids: &[String]) -> StoreResult<HashMap<String, Record>> {
        let state = self.lock();
        let Some(records) = state.scopes.get(&scope.key) else {
            return Ok(HashMap::new());
        };
        Ok(records
            .iter()
            .filter(|r| ids.contains(&r.id))
            .map(|r| (r.id.clone(), r.clone()))
            .collect())
    }

    async fn delete_many(&self, scope: &Scope, ids: &[String]) -> StoreResult<MutationOutcome> {
        {
            let mut state = self.lock();
            state.calls.push(StoreCall::Delete {
                scope: scope.key.clone(),
                ids: ids.to_vec(),
            });
        }
        self.check_batch(ids)?;

        let failed = self.record_failures(ids);
        let failed_ids: HashSet<&str> = failed.iter().map(|e| e.id.as_str()).collect();
        let mut state = self.lock();
        if let Some(records) = state.scopes.get_mut(&scope.key) {
            records.retain(|r| !ids.contains(&r.id) || failed_ids.contains(r.id.as_str()));
        }
        Ok(MutationOutcome { failed })
    }

    async fn upsert_many(&self, scope: &Scope, records: &[Record]) -> StoreResult<MutationOutcome> {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        {
            let mut state = self.lock();
            state.calls.push(StoreCall::Upsert {
                scope: scope.key.clone(),
                ids: ids.clone(),
            });
        }
        self.check_batch(&ids)?;

        let failed = self.record_failures(&ids);
        let landed: Vec<Record> = records
            .iter()
            .filter(|r| !failed.iter().any(|e| e.id == r.id))
            .cloned()
            .collect();
        self.insert(&scope.key, landed);
        Ok(MutationOutcome { failed })
    }
}
