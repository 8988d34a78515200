use super::RunOptions;
use crate::reconcile::{
    ConfirmationGate, ConfirmationInput, MutationPlan, PaginatedEnumerator, ReconcileError,
    ReconciliationEngine, RecordFilter, Result, RunReport, Scope,
};
use crate::store::RemoteStore;
use std::collections::HashSet;
use tracing::info;

pub const PROCEDURE: &str = "copy-namespace";

#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: String,
    pub target: String,
    pub filter: RecordFilter,
    /// Leave records the target already holds untouched.
    pub skip_existing: bool,
}

/// Copy every record admitted by the filter from one namespace to another.
///
/// `source_store` and `target_store` may be the same store.
pub async fn copy_namespace<S, T, I>(
    source_store: &S,
    target_store: &T,
    request: &CopyRequest,
    options: &RunOptions,
    gate: &mut ConfirmationGate<I>,
) -> Result<RunReport>
where
    S: RemoteStore + ?Sized,
    T: RemoteStore + ?Sized,
    I: ConfirmationInput,
{
    if request.source == request.target {
        return Err(ReconcileError::Configuration(format!(
            "source and target namespace are both '{}'",
            request.source
        )));
    }

    let source = Scope::namespace(&request.source);
    let target = Scope::namespace(&request.target);
    let mut report = RunReport::begin(PROCEDURE, format!("{source} -> {target}"), options.mode);

    let enumeration = PaginatedEnumerator::new(source_store)
        .enumerate(&source)
        .await?;
    report.record_enumeration(&enumeration);

    let mut records = request.filter.apply(enumeration.records);
    let admitted = records.len();

    if request.skip_existing && !records.is_empty() {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let mut existing: HashSet<String> = HashSet::new();
        for chunk in ids.chunks(options.batch.batch_size.max(1)) {
            existing.extend(target_store.fetch(&target, chunk).await?.into_keys());
        }
        records.retain(|r| !existing.contains(&r.id));
        info!(already_present = existing.len(), "Skipping records present in target");
    }

    let plan = MutationPlan::upsert(target, records, options.batch)?;
    info!(admitted, planned = plan.len(), "Planned namespace copy");

    ReconciliationEngine::new(target_store, gate, options.mode)
        .apply(report, &plan)
        .await
}
