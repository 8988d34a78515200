use super::models::{DuplicateGroup, Record};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Groups records by group key and ranks each group best-first.
///
/// Retention rule: more uses wins, then the later `logged_at` (missing
/// timestamps rank last), then whichever record was enumerated first.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuplicateResolver;

impl DuplicateResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, records: &[Record]) -> Vec<DuplicateGroup> {
        let mut order: Vec<&str> = Vec::new();
        let mut buckets: HashMap<&str, Vec<&Record>> = HashMap::new();

        for record in records {
            let Some(key) = record.group_key.as_deref() else {
                continue;
            };
            buckets
                .entry(key)
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(record);
        }

        let groups: Vec<DuplicateGroup> = order
            .into_iter()
            .filter_map(|key| {
                let mut members = buckets.remove(key)?;
                if members.len() < 2 {
                    return None;
                }
                // sort_by is stable, which supplies the enumeration-order tie-break
                members.sort_by(|a, b| rank(a, b));
                Some(DuplicateGroup {
                    group_key: key.to_string(),
                    members: members.into_iter().cloned().collect(),
                })
            })
            .collect();

        debug!(
            records = records.len(),
            groups = groups.len(),
            "Resolved duplicate groups"
        );
        groups
    }

    /// Ids of every record that loses its group, in group order.
    pub fn deletion_ids(groups: &[DuplicateGroup]) -> Vec<String> {
        groups
            .iter()
            .flat_map(|g| g.to_delete().iter().map(|r| r.id.clone()))
            .collect()
    }
}

fn rank(a: &Record, b: &Record) -> Ordering {
    b.ranking
        .usage_count
        .cmp(&a.ranking.usage_count)
        .then_with(|| match (a.ranking.logged_at, b.ranking.logged_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}
