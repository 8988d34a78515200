use super::aggregator::ResultAggregator;
use super::models::{BatchResult, MutationKind, MutationPlan, Record, RecordError};
use crate::store::{RemoteStore, StoreResult, MutationOutcome};
use futures::stream::{self, Stream};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Applies a [`MutationPlan`] one batch at a time.
///
/// Batches run strictly in plan order with the plan's delay between each
/// adjacent pair. A failed batch is recorded against every id in it and the
/// run moves on; nothing is retried.
pub struct BatchMutator<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RemoteStore + ?Sized> BatchMutator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Lazily yields one partial result per batch. Each call starts over at
    /// batch zero.
    pub fn execute<'p>(&'p self, plan: &'p MutationPlan) -> impl Stream<Item = BatchResult> + 'p
    where
        'a: 'p,
    {
        let batches: Vec<&'p [String]> = plan.batches().collect();
        let total = batches.len();

        stream::unfold(0usize, move |index| {
            let batch = batches.get(index).copied();
            async move {
                let ids = batch?;
                if index > 0 && plan.inter_batch_delay_ms > 0 {
                    debug!(delay_ms = plan.inter_batch_delay_ms, "Waiting before next batch");
                    tokio::time::sleep(Duration::from_millis(plan.inter_batch_delay_ms)).await;
                }
                let result = self.apply_batch(plan, ids).await;
                debug!(
                    batch = index + 1,
                    total,
                    succeeded = result.succeeded,
                    failed = result.failed,
                    "Batch finished"
                );
                Some((result, index + 1))
            }
        })
    }

    /// Execute the whole plan and sum the batch results.
    pub async fn run(&self, plan: &MutationPlan) -> BatchResult {
        info!(
            kind = %plan.kind,
            scope = %plan.scope,
            targets = plan.len(),
            batches = plan.batch_count(),
            "Applying mutation plan"
        );
        ResultAggregator::aggregate(self.execute(plan)).await
    }

    async fn apply_batch(&self, plan: &MutationPlan, ids: &[String]) -> BatchResult {
        let mut missing = Vec::new();
        let outcome = match plan.kind {
            MutationKind::Delete => self.store.delete_many(&plan.scope, ids).await,
            MutationKind::Upsert => {
                let mut records: Vec<Record> = Vec::with_capacity(ids.len());
                for id in ids {
                    match plan.payload(id) {
                        Some(record) => records.push(record.clone()),
                        None => missing.push(RecordError::new(id.clone(), "no payload in plan")),
                    }
                }
                if records.is_empty() {
                    Ok(MutationOutcome::ok())
                } else {
                    self.store.upsert_many(&plan.scope, &records).await
                }
            }
        };
        Self::tally(ids, outcome, missing)
    }

    fn tally(
        ids: &[String],
        outcome: StoreResult<MutationOutcome>,
        mut errors: Vec<RecordError>,
    ) -> BatchResult {
        match outcome {
            Ok(outcome) => {
                let mut seen: HashSet<String> = errors.iter().map(|e| e.id.clone()).collect();
                for error in outcome.failed {
                    // Stores may echo unknown or repeated ids; only count ours, once.
                    if ids.contains(&error.id) && seen.insert(error.id.clone()) {
                        errors.push(error);
                    }
                }
                BatchResult {
                    attempted: ids.len(),
                    succeeded: ids.len() - errors.len(),
                    failed: errors.len(),
                    errors,
                }
            }
            Err(e) => {
                warn!(ids = ids.len(), error = %e, "Batch failed");
                BatchResult::all_failed(ids, &e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::models::{BatchSettings, Scope};
    use crate::store::memory::StoreCall;
    use crate::store::InMemoryStore;
    use futures::StreamExt;
    use std::time::Instant;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("r{i:03}")).collect()
    }

    fn seeded(n: usize) -> InMemoryStore {
        InMemoryStore::new().with_records(
            "ns",
            ids(n).into_iter().map(|id| Record::new(id, "memory")).collect(),
        )
    }

    fn plan(n: usize, batch_size: usize, delay_ms: u64) -> MutationPlan {
        MutationPlan::delete(
            Scope::namespace("ns"),
            ids(n),
            BatchSettings {
                batch_size,
                inter_batch_delay_ms: delay_ms,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_batches_run_in_order() {
        let store = seeded(250);
        let plan = plan(250, 100, 0);
        let results: Vec<BatchResult> = BatchMutator::new(&store).execute(&plan).collect().await;

        let sizes: Vec<usize> = results.iter().map(|r| r.attempted).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        let calls = store.calls();
        assert_eq!(calls.len(), 3);
        match &calls[2] {
            StoreCall::Delete { ids, .. } => assert_eq!(ids.first().unwrap(), "r200"),
            other => panic!("unexpected call {other:?}"),
        }
        assert!(store.ids("ns").is_empty());
    }

    #[tokio::test]
    async fn test_delay_between_batches_only() {
        let store = seeded(3);
        let plan = plan(3, 1, 30);

        let start = Instant::now();
        let result = BatchMutator::new(&store).run(&plan).await;
        let elapsed = start.elapsed();

        assert_eq!(result.succeeded, 3);
        // two gaps for three batches
        assert!(elapsed >= Duration::from_millis(60), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(90 + 500), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_abort_run() {
        let store = seeded(6).fail_batch_containing("r002");
        let plan = plan(6, 2, 0);

        let result = BatchMutator::new(&store).run(&plan).await;

        assert_eq!(result.attempted, 6);
        assert_eq!(result.failed, 2);
        assert_eq!(result.succeeded, 4);
        assert_eq!(result.failed_ids().collect::<Vec<_>>(), vec!["r002", "r003"]);
        assert_eq!(store.ids("ns"), vec!["r002", "r003"]);
    }

    #[tokio::test]
    async fn test_per_record_failures_are_isolated() {
        let store = seeded(4).fail_record("r001");
        let plan = plan(4, 4, 0);

        let result = BatchMutator::new(&store).run(&plan).await;

        assert_eq!(result.succeeded, 3);
        assert_eq!(result.errors, vec![RecordError::new("r001", "injected record failure")]);
    }

    #[tokio::test]
    async fn test_stream_restarts_from_first_batch() {
        let store = seeded(4);
        let plan = plan(4, 2, 0);
        let mutator = BatchMutator::new(&store);

        let first: Vec<BatchResult> = mutator.execute(&plan).take(1).collect().await;
        let again: Vec<BatchResult> = mutator.execute(&plan).collect().await;

        assert_eq!(first.len(), 1);
        assert_eq!(again.len(), 2);
        assert_eq!(store.mutation_count(), 3);
    }

    #[tokio::test]
    async fn test_upsert_writes_payloads_to_target_scope() {
        let store = InMemoryStore::new();
        let records = vec![
            Record::new("a", "memory").with_usage_count(4),
            Record::new("b", "memory"),
        ];
        let plan = MutationPlan::upsert(
            Scope::namespace("copy"),
            records,
            BatchSettings {
                batch_size: 1,
                inter_batch_delay_ms: 0,
            },
        )
        .unwrap();

        let result = BatchMutator::new(&store).run(&plan).await;

        assert_eq!(result.succeeded, 2);
        let copied = store.records("copy");
        assert_eq!(copied.len(), 2);
        assert_eq!(copied[0].ranking.usage_count, 4);
    }
}
