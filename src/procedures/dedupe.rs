use super::RunOptions;
use crate::reconcile::{
    ConfirmationGate, ConfirmationInput, DuplicateResolver, MutationPlan, PaginatedEnumerator,
    ReconciliationEngine, Result, RunReport, Scope,
};
use crate::store::RemoteStore;
use tracing::{debug, info};

pub const PROCEDURE: &str = "dedupe-memories";

/// Delete every memory that loses its duplicate group in `namespace`.
pub async fn dedupe_memories<S, I>(
    store: &S,
    namespace: &str,
    options: &RunOptions,
    gate: &mut ConfirmationGate<I>,
) -> Result<RunReport>
where
    S: RemoteStore + ?Sized,
    I: ConfirmationInput,
{
    let scope = Scope::namespace(namespace);
    let mut report = RunReport::begin(PROCEDURE, &scope, options.mode);

    let enumeration = PaginatedEnumerator::new(store).enumerate(&scope).await?;
    report.record_enumeration(&enumeration);

    let groups = DuplicateResolver::new().resolve(&enumeration.records);
    for group in &groups {
        debug!(
            group_key = %group.group_key,
            keep = %group.keep().id,
            delete = group.to_delete().len(),
            "Duplicate group"
        );
    }
    report.record_groups(&groups);

    let plan = MutationPlan::delete(
        scope,
        DuplicateResolver::deletion_ids(&groups),
        options.batch,
    )?;
    info!(
        groups = groups.len(),
        duplicates = plan.len(),
        "Planned duplicate cleanup"
    );

    ReconciliationEngine::new(store, gate, options.mode)
        .apply(report, &plan)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{BatchSettings, ConfirmMode, Record, ScriptedInput};
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_dedupe_scenario() {
        let store = InMemoryStore::new().with_records(
            "coach",
            vec![
                Record::new("a", "userMemory").with_group_key("m1").with_usage_count(5),
                Record::new("b", "userMemory").with_group_key("m1").with_usage_count(9),
                Record::new("c", "userMemory").with_group_key("m2").with_usage_count(1),
            ],
        );
        let options = RunOptions::new(
            ConfirmMode::AutoConfirm,
            BatchSettings {
                batch_size: 10,
                inter_batch_delay_ms: 0,
            },
        );
        let mut gate = ConfirmationGate::new(ScriptedInput::default());

        let report = dedupe_memories(&store, "coach", &options, &mut gate).await.unwrap();

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].keep, "b");
        assert_eq!(report.planned_ids, vec!["a"]);
        assert_eq!(store.ids("coach"), vec!["b", "c"]);
    }
}
