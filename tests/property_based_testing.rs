//! Property-based tests for the reconciliation invariants.


use chrono::{TimeZone, Utc};
use coach_maintenance::reconcile::{
    DuplicateResolver, MutationPlan, Record, RecordFilter, Scope,
};
use proptest::prelude::*;
use std::collections::HashSet;
use test_helpers::fast_batches;

const CATEGORIES: [&str; 5] = ["user", "userMemory", "workout", "message", "goal"];

prop_compose! {
    fn arb_record()(
        id in 0u32..500,
        group in proptest::option::of(0u8..6),
        usage_count in 0u64..10,
        logged_at in proptest::option::of(1_600_000_000i64..1_700_000_000),
        category in 0usize..CATEGORIES.len(),
    ) -> Record {
        let mut record = Record::new(format!("r{id}"), CATEGORIES[category]).with_usage_count(usage_count);
        if let Some(group) = group {
            record = record.with_group_key(format!("g{group}"));
        }
        if let Some(secs) = logged_at {
            if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
                record = record.with_logged_at(ts);
            }
        }
        record
    }
}

fn unique_records() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(arb_record(), 0..60).prop_map(|records| {
        let mut seen = HashSet::new();
        records
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .collect()
    })
}

fn category_list() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(0usize..CATEGORIES.len(), 0..4)
        .prop_map(|picks| picks.into_iter().map(|i| CATEGORIES[i].to_string()).collect())
}

proptest! {
    #[test]
    fn resolver_keeps_exactly_one_per_group(records in unique_records()) {
        let groups = DuplicateResolver::new().resolve(&records);
        let deletions = DuplicateResolver::deletion_ids(&groups);

        let keepers: HashSet<&str> = groups.iter().map(|g| g.keep().id.as_str()).collect();
        prop_assert_eq!(keepers.len(), groups.len());
        for id in &deletions {
            prop_assert!(!keepers.contains(id.as_str()));
        }
        let expected: usize = groups.iter().map(|g| g.members.len() - 1).sum();
        prop_assert_eq!(deletions.len(), expected);
    }

    #[test]
    fn resolver_keeper_outranks_the_rest(records in unique_records()) {
        for group in DuplicateResolver::new().resolve(&records) {
            let keep = group.keep();
            for loser in group.to_delete() {
                prop_assert!(keep.ranking.usage_count >= loser.ranking.usage_count);
                if keep.ranking.usage_count == loser.ranking.usage_count {
                    prop_assert!(
                        loser.ranking.logged_at.is_none()
                            || keep.ranking.logged_at >= loser.ranking.logged_at
                    );
                }
            }
        }
    }

    #[test]
    fn resolver_is_deterministic(records in unique_records()) {
        let first = DuplicateResolver::deletion_ids(&DuplicateResolver::new().resolve(&records));
        let second = DuplicateResolver::deletion_ids(&DuplicateResolver::new().resolve(&records));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn filter_never_admits_excluded(
        records in unique_records(),
        include in category_list(),
        exclude in category_list(),
    ) {
        let filter = RecordFilter::new(include.clone(), exclude.clone());
        for record in filter.apply(records) {
            prop_assert!(!exclude.contains(&record.category));
            if !include.is_empty() {
                prop_assert!(include.contains(&record.category));
            }
        }
    }

    #[test]
    fn filter_preserves_order(records in unique_records(), exclude in category_list()) {
        let filter = RecordFilter::new(Vec::<String>::new(), exclude);
        let kept: Vec<String> = filter.apply(records.clone()).into_iter().map(|r| r.id).collect();
        let expected: Vec<String> = records.into_iter().filter(|r| filter.admits(r)).map(|r| r.id).collect();
        prop_assert_eq!(kept, expected);
    }

    #[test]
    fn plan_batches_cover_every_id_once(
        count in 0usize..400,
        batch_size in 1usize..150,
    ) {
        let ids: Vec<String> = (0..count).map(|i| format!("id{i}")).collect();
        let plan = MutationPlan::delete(Scope::namespace("ns"), ids.clone(), fast_batches(batch_size)).unwrap();

        let batches: Vec<&[String]> = plan.batches().collect();
        prop_assert_eq!(batches.len(), count.div_ceil(batch_size));
        for batch in &batches {
            prop_assert!(!batch.is_empty() && batch.len() <= batch_size);
        }
        let flattened: Vec<String> = batches.concat();
        prop_assert_eq!(flattened, ids);
    }
}
