use super::error::{ReconcileError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Ranking inputs for duplicate resolution. Never written back to a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingMetrics {
    pub usage_count: u64,
    pub logged_at: Option<DateTime<Utc>>,
}

/// A record as returned by a [`crate::store::RemoteStore`]. The core only
/// reads, references, or deletes records; it never edits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub group_key: Option<String>,
    pub ranking: RankingMetrics,
    pub category: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Record {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group_key: None,
            ranking: RankingMetrics::default(),
            category: category.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_group_key(mut self, group_key: impl Into<String>) -> Self {
        self.group_key = Some(group_key.into());
        self
    }

    pub fn with_usage_count(mut self, usage_count: u64) -> Self {
        self.ranking.usage_count = usage_count;
        self
    }

    pub fn with_logged_at(mut self, logged_at: DateTime<Utc>) -> Self {
        self.ranking.logged_at = Some(logged_at);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Namespace,
    Partition,
}

/// Half-open time window `[since, until)` over `RankingMetrics::logged_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// Fails when the window start falls outside the representable date range.
    pub fn last_weeks(weeks: u32, now: DateTime<Utc>) -> Result<Self> {
        let since = Duration::try_weeks(i64::from(weeks))
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or_else(|| {
                ReconcileError::Configuration(format!("--weeks={weeks} reaches past the earliest supported date"))
            })?;
        Ok(Self { since, until: None })
    }

    /// Records without a timestamp fall outside every window.
    pub fn contains(&self, logged_at: Option<DateTime<Utc>>) -> bool {
        match logged_at {
            Some(ts) => ts >= self.since && self.until.map_or(true, |until| ts < until),
            None => false,
        }
    }
}

/// The bounding key for enumeration and mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
}

impl Scope {
    pub fn namespace(name: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Namespace,
            key: name.into(),
            window: None,
        }
    }

    pub fn partition(key: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Partition,
            key: key.into(),
            window: None,
        }
    }

    pub fn within(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn admits(&self, record: &Record) -> bool {
        self.window
            .as_ref()
            .map_or(true, |w| w.contains(record.ranking.logged_at))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ScopeKind::Namespace => "namespace",
            ScopeKind::Partition => "partition",
        };
        write!(f, "{kind}:{}", self.key)?;
        if let Some(window) = &self.window {
            write!(f, " since {}", window.since.format("%Y-%m-%d"))?;
        }
        Ok(())
    }
}

/// Records sharing one group key, ranked best-first.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub group_key: String,
    pub members: Vec<Record>,
}

impl DuplicateGroup {
    pub fn keep(&self) -> &Record {
        &self.members[0]
    }

    pub fn to_delete(&self) -> &[Record] {
        &self.members[1..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Delete,
    Upsert,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Delete => write!(f, "delete"),
            MutationKind::Upsert => write!(f, "upsert"),
        }
    }
}

/// Batch sizing and pacing, resolved once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            inter_batch_delay_ms: 1000,
        }
    }
}

/// What a run intends to mutate. Built once, consumed by the mutator.
#[derive(Debug, Clone)]
pub struct MutationPlan {
    pub scope: Scope,
    pub kind: MutationKind,
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
    target_ids: Vec<String>,
    payloads: HashMap<String, Record>,
}

impl MutationPlan {
    pub fn delete<I>(scope: Scope, ids: I, settings: BatchSettings) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        Self::validate(&settings)?;
        Ok(Self {
            scope,
            kind: MutationKind::Delete,
            batch_size: settings.batch_size,
            inter_batch_delay_ms: settings.inter_batch_delay_ms,
            target_ids: dedup_preserving_order(ids),
            payloads: HashMap::new(),
        })
    }

    pub fn upsert(scope: Scope, records: Vec<Record>, settings: BatchSettings) -> Result<Self> {
        Self::validate(&settings)?;
        let target_ids = dedup_preserving_order(records.iter().map(|r| r.id.clone()));
        let mut payloads = HashMap::with_capacity(records.len());
        for record in records {
            payloads.entry(record.id.clone()).or_insert(record);
        }
        Ok(Self {
            scope,
            kind: MutationKind::Upsert,
            batch_size: settings.batch_size,
            inter_batch_delay_ms: settings.inter_batch_delay_ms,
            target_ids,
            payloads,
        })
    }

    fn validate(settings: &BatchSettings) -> Result<()> {
        if settings.batch_size == 0 {
            return Err(ReconcileError::Configuration(
                "batch size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn target_ids(&self) -> &[String] {
        &self.target_ids
    }

    pub fn len(&self) -> usize {
        self.target_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_ids.is_empty()
    }

    pub fn batch_count(&self) -> usize {
        self.target_ids.len().div_ceil(self.batch_size)
    }

    /// Contiguous id batches in plan order; the last may be shorter.
    pub fn batches(&self) -> impl Iterator<Item = &[String]> {
        self.target_ids.chunks(self.batch_size)
    }

    pub fn payload(&self, id: &str) -> Option<&Record> {
        self.payloads.get(id)
    }
}

fn dedup_preserving_order<I>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub id: String,
    pub message: String,
}

impl RecordError {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Outcome of one batch, or the sum of many.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<RecordError>,
}

impl BatchResult {
    pub fn all_failed(ids: &[String], message: &str) -> Self {
        Self {
            attempted: ids.len(),
            succeeded: 0,
            failed: ids.len(),
            errors: ids
                .iter()
                .map(|id| RecordError::new(id.clone(), message))
                .collect(),
        }
    }

    pub fn merge(&mut self, other: BatchResult) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings(batch_size: usize) -> BatchSettings {
        BatchSettings {
            batch_size,
            inter_batch_delay_ms: 0,
        }
    }

    #[test]
    fn test_plan_rejects_zero_batch_size() {
        let result = MutationPlan::delete(Scope::namespace("ns"), vec!["a".to_string()], settings(0));
        assert!(matches!(result, Err(ReconcileError::Configuration(_))));
    }

    #[test]
    fn test_plan_deduplicates_target_ids() {
        let ids = ["a", "b", "a", "c", "b"].iter().map(|s| s.to_string());
        let plan = MutationPlan::delete(Scope::namespace("ns"), ids, settings(2)).unwrap();

        assert_eq!(plan.target_ids(), &["a", "b", "c"]);
        assert_eq!(plan.batch_count(), 2);
    }

    #[test]
    fn test_plan_batches_250_by_100() {
        let ids = (0..250).map(|i| format!("id-{i}"));
        let plan = MutationPlan::delete(Scope::namespace("ns"), ids, settings(100)).unwrap();

        let sizes: Vec<usize> = plan.batches().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn test_upsert_plan_keeps_first_payload() {
        let records = vec![
            Record::new("a", "memory").with_usage_count(1),
            Record::new("a", "memory").with_usage_count(2),
        ];
        let plan = MutationPlan::upsert(Scope::namespace("target"), records, settings(10)).unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.payload("a").unwrap().ranking.usage_count, 1);
        assert_eq!(plan.kind, MutationKind::Upsert);
    }

    #[test]
    fn test_time_window_excludes_missing_timestamps() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let window = TimeWindow::last_weeks(2, now).unwrap();

        assert!(window.contains(Some(now - Duration::days(3))));
        assert!(!window.contains(Some(now - Duration::weeks(3))));
        assert!(!window.contains(None));
    }

    #[test]
    fn test_time_window_rejects_out_of_range_weeks() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        assert!(matches!(
            TimeWindow::last_weeks(u32::MAX, now),
            Err(ReconcileError::Configuration(_))
        ));
        assert!(TimeWindow::last_weeks(52 * 100, now).is_ok());
    }

    #[test]
    fn test_batch_result_merge_concatenates_errors() {
        let mut total = BatchResult::default();
        total.merge(BatchResult::all_failed(&["x".to_string()], "boom"));
        total.merge(BatchResult {
            attempted: 2,
            succeeded: 2,
            failed: 0,
            errors: vec![],
        });

        assert_eq!(total.attempted, 3);
        assert_eq!(total.succeeded, 2);
        assert_eq!(total.failed, 1);
        assert_eq!(total.failed_ids().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::namespace("coach").to_string(), "namespace:coach");
        assert_eq!(Scope::partition("u-1").to_string(), "partition:u-1");
    }
}
