use super::RunOptions;
use crate::reconcile::{
    ConfirmationGate, ConfirmationInput, MutationPlan, PaginatedEnumerator, ReconciliationEngine,
    RecordFilter, Result, RunReport, Scope, TimeWindow,
};
use crate::store::RemoteStore;
use chrono::{DateTime, Utc};
use tracing::info;

pub const PROCEDURE: &str = "delete-user-records";

#[derive(Debug, Clone)]
pub struct PurgeRequest {
    pub user_id: String,
    pub filter: RecordFilter,
    /// Restrict to records logged in the last N weeks.
    pub weeks: Option<u32>,
}

impl PurgeRequest {
    pub fn scope(&self, now: DateTime<Utc>) -> Result<Scope> {
        let scope = Scope::partition(&self.user_id);
        Ok(match self.weeks {
            Some(weeks) => scope.within(TimeWindow::last_weeks(weeks, now)?),
            None => scope,
        })
    }
}

/// Delete a user's records that survive the category filter.
pub async fn delete_user_records<S, I>(
    store: &S,
    request: &PurgeRequest,
    options: &RunOptions,
    gate: &mut ConfirmationGate<I>,
) -> Result<RunReport>
where
    S: RemoteStore + ?Sized,
    I: ConfirmationInput,
{
    let scope = request.scope(Utc::now())?;
    let mut report = RunReport::begin(PROCEDURE, &scope, options.mode);

    let enumeration = PaginatedEnumerator::new(store).enumerate(&scope).await?;
    report.record_enumeration(&enumeration);

    let targets = request.filter.apply(enumeration.records);
    let plan = MutationPlan::delete(scope, targets.into_iter().map(|r| r.id), options.batch)?;
    info!(
        include = ?request.filter.include().collect::<Vec<_>>(),
        exclude = ?request.filter.exclude().collect::<Vec<_>>(),
        planned = plan.len(),
        "Planned user record deletion"
    );

    ReconciliationEngine::new(store, gate, options.mode)
        .apply(report, &plan)
        .await
}
