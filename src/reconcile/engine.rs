use super::confirmation::{ConfirmMode, ConfirmationGate, ConfirmationInput};
use super::enumerator::Enumeration;
use super::error::{ReconcileError, Result};
use super::models::{BatchResult, DuplicateGroup, MutationPlan};
use super::mutator::BatchMutator;
use crate::store::{ListingCoverage, RemoteStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Keep/delete decision for one duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_key: String,
    pub keep: String,
    pub delete: Vec<String>,
}

impl From<&DuplicateGroup> for GroupSummary {
    fn from(group: &DuplicateGroup) -> Self {
        Self {
            group_key: group.group_key.clone(),
            keep: group.keep().id.clone(),
            delete: group.to_delete().iter().map(|r| r.id.clone()).collect(),
        }
    }
}

/// Everything a run did or, for a dry run, would do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub procedure: String,
    pub scope: String,
    pub mode: ConfirmMode,
    pub coverage: ListingCoverage,
    pub enumerated: usize,
    pub planned: usize,
    pub planned_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub groups: Vec<GroupSummary>,
    pub executed: bool,
    pub result: BatchResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn begin(procedure: &str, scope: impl ToString, mode: ConfirmMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            procedure: procedure.to_string(),
            scope: scope.to_string(),
            mode,
            coverage: ListingCoverage::Exhaustive,
            enumerated: 0,
            planned: 0,
            planned_ids: Vec::new(),
            groups: Vec::new(),
            executed: false,
            result: BatchResult::default(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_enumeration(&mut self, enumeration: &Enumeration) {
        self.enumerated = enumeration.records.len();
        self.coverage = enumeration.coverage;
    }

    pub fn record_groups(&mut self, groups: &[DuplicateGroup]) {
        self.groups = groups.iter().map(GroupSummary::from).collect();
    }

    pub fn is_approximate(&self) -> bool {
        self.coverage == ListingCoverage::Approximate
    }

    /// Turn partial failure into an error for callers that need all-or-nothing.
    pub fn into_strict(self) -> Result<Self> {
        if self.result.has_failures() {
            return Err(ReconcileError::BatchMutationFailure {
                attempted: self.result.attempted,
                failed: self.result.failed,
            });
        }
        Ok(self)
    }
}

/// Runs the gate, then the mutator, for one planned mutation.
pub struct ReconciliationEngine<'a, S: RemoteStore + ?Sized, I: ConfirmationInput> {
    store: &'a S,
    gate: &'a mut ConfirmationGate<I>,
    mode: ConfirmMode,
}

impl<'a, S: RemoteStore + ?Sized, I: ConfirmationInput> ReconciliationEngine<'a, S, I> {
    pub fn new(store: &'a S, gate: &'a mut ConfirmationGate<I>, mode: ConfirmMode) -> Self {
        Self { store, gate, mode }
    }

    pub async fn apply(&mut self, mut report: RunReport, plan: &MutationPlan) -> Result<RunReport> {
        report.planned = plan.len();
        report.planned_ids = plan.target_ids().to_vec();

        let action = plan.kind.to_string();
        let target = plan.scope.to_string();
        if !self.gate.should_proceed(plan.len(), self.mode, &action, &target)? {
            if self.mode == ConfirmMode::Interactive && !plan.is_empty() {
                info!("Cancelled by user; nothing was changed");
            }
            report.finished_at = Some(Utc::now());
            return Ok(report);
        }

        report.executed = true;
        report.result = BatchMutator::new(self.store).run(plan).await;
        report.finished_at = Some(Utc::now());

        if report.result.has_failures() {
            warn!(
                failed = report.result.failed,
                attempted = report.result.attempted,
                "Mutation finished with failures"
            );
        } else {
            info!(succeeded = report.result.succeeded, "Mutation finished");
        }
        Ok(report)
    }
}
