use super::error::{ReconcileError, Result};
use super::models::{Record, Scope};
use crate::store::{Cursor, ListingCoverage, RemoteStore, StoreError};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Every record found in a scope, in first-seen order.
#[derive(Debug, Clone)]
pub struct Enumeration {
    pub records: Vec<Record>,
    pub coverage: ListingCoverage,
    pub pages: usize,
    /// Ids returned more than once across pages and dropped.
    pub duplicates_discarded: usize,
    /// Records returned by the store but outside the scope's time window.
    pub outside_window: usize,
}

impl Enumeration {
    pub fn is_complete(&self) -> bool {
        self.coverage == ListingCoverage::Exhaustive
    }
}

/// Walks a store's pages until it stops handing out cursors.
pub struct PaginatedEnumerator<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
    max_pages: Option<usize>,
}

impl<'a, S: RemoteStore + ?Sized> PaginatedEnumerator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            max_pages: None,
        }
    }

    /// Guard against stores that never stop returning cursors.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub async fn enumerate(&self, scope: &Scope) -> Result<Enumeration> {
        let mut records = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: Option<Cursor> = None;
        let mut pages = 0usize;
        let mut duplicates_discarded = 0usize;
        let mut outside_window = 0usize;

        loop {
            let page = self
                .store
                .list(scope, cursor.as_ref())
                .await
                .map_err(|e| Self::unavailable(scope, pages, e))?;
            pages += 1;

            debug!(
                store = self.store.name(),
                page = pages,
                items = page.items.len(),
                "Fetched page"
            );

            for record in page.items {
                if !seen.insert(record.id.clone()) {
                    duplicates_discarded += 1;
                    continue;
                }
                if !scope.admits(&record) {
                    outside_window += 1;
                    continue;
                }
                records.push(record);
            }

            match page.next_cursor {
                Some(next) => {
                    if self.max_pages.is_some_and(|max| pages >= max) {
                        return Err(ReconcileError::scope_unavailable(
                            scope,
                            format!("listing exceeded {pages} pages"),
                        ));
                    }
                    cursor = Some(next);
                }
                None => break,
            }
        }

        let coverage = self.store.coverage();
        if coverage == ListingCoverage::Approximate {
            warn!(
                store = self.store.name(),
                scope = %scope,
                "Store has no native listing; enumeration is approximate and may miss records"
            );
        }
        info!(
            scope = %scope,
            records = records.len(),
            pages,
            duplicates_discarded,
            "Enumeration complete"
        );

        Ok(Enumeration {
            records,
            coverage,
            pages,
            duplicates_discarded,
            outside_window,
        })
    }

    fn unavailable(scope: &Scope, pages: usize, error: StoreError) -> ReconcileError {
        let reason = match (&error, pages) {
            (StoreError::ScopeNotFound(_), _) => "scope does not exist".to_string(),
            (_, 0) => format!("initial listing failed: {error}"),
            (_, n) => format!("listing failed after {n} pages: {error}"),
        };
        ReconcileError::scope_unavailable(scope, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::models::TimeWindow;
    use crate::store::InMemoryStore;
    use chrono::{Duration, Utc};
    use tracing_test::traced_test;

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new(format!("r{i}"), "memory")).collect()
    }

    #[tokio::test]
    async fn test_empty_scope_is_empty_not_error() {
        let store = InMemoryStore::new().with_records("ns", vec![]);
        let result = PaginatedEnumerator::new(&store)
            .enumerate(&Scope::namespace("ns"))
            .await
            .unwrap();

        assert!(result.records.is_empty());
        assert_eq!(result.pages, 1);
    }

    #[tokio::test]
    async fn test_walks_every_page() {
        let store = InMemoryStore::new().with_page_size(3).with_records("ns", records(10));
        let result = PaginatedEnumerator::new(&store)
            .enumerate(&Scope::namespace("ns"))
            .await
            .unwrap();

        assert_eq!(result.records.len(), 10);
        assert_eq!(result.pages, 4);
        assert_eq!(result.records[9].id, "r9");
    }

    #[tokio::test]
    async fn test_overlapping_pages_are_deduplicated() {
        let store = InMemoryStore::new()
            .with_page_size(4)
            .with_page_overlap(2)
            .with_coverage(ListingCoverage::Approximate)
            .with_records("ns", records(9));
        let result = PaginatedEnumerator::new(&store)
            .enumerate(&Scope::namespace("ns"))
            .await
            .unwrap();

        let ids: Vec<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8"]);
        assert!(result.duplicates_discarded > 0);
        assert!(!result.is_complete());
    }

    #[tokio::test]
    async fn test_missing_scope_is_fatal() {
        let store = InMemoryStore::new();
        let result = PaginatedEnumerator::new(&store)
            .enumerate(&Scope::namespace("ghost"))
            .await;

        assert!(matches!(result, Err(ReconcileError::ScopeUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_later_page_failure_returns_no_partial_results() {
        let store = InMemoryStore::new()
            .with_page_size(2)
            .with_records("ns", records(6))
            .fail_list_page(1);
        let result = PaginatedEnumerator::new(&store)
            .enumerate(&Scope::namespace("ns"))
            .await;

        match result {
            Err(ReconcileError::ScopeUnavailable { reason, .. }) => {
                assert!(reason.contains("after 1 pages"), "{reason}");
            }
            other => panic!("expected ScopeUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_time_window_applies_to_every_store() {
        let now = Utc::now();
        let store = InMemoryStore::new().with_records(
            "u1",
            vec![
                Record::new("recent", "workout").with_logged_at(now - Duration::days(2)),
                Record::new("old", "workout").with_logged_at(now - Duration::weeks(10)),
                Record::new("undated", "workout"),
            ],
        );
        let scope = Scope::partition("u1").within(TimeWindow::last_weeks(4, now).unwrap());

        let result = PaginatedEnumerator::new(&store).enumerate(&scope).await.unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].id, "recent");
        assert_eq!(result.outside_window, 2);
    }

    #[tokio::test]
    async fn test_max_pages_guard() {
        let store = InMemoryStore::new().with_page_size(1).with_records("ns", records(5));
        let result = PaginatedEnumerator::new(&store)
            .with_max_pages(2)
            .enumerate(&Scope::namespace("ns"))
            .await;

        assert!(matches!(result, Err(ReconcileError::ScopeUnavailable { .. })));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_approximate_listing_is_logged() {
        let store = InMemoryStore::new()
            .with_coverage(ListingCoverage::Approximate)
            .with_records("ns", records(3));
        let result = PaginatedEnumerator::new(&store)
            .enumerate(&Scope::namespace("ns"))
            .await
            .unwrap();

        assert_eq!(result.coverage, ListingCoverage::Approximate);
        assert!(logs_contain("enumeration is approximate"));
    }
}
