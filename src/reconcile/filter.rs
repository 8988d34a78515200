//! Category filtering ahead of a mutation.
//!
//! Exclusion is checked first and always wins, so a category that appears in
//! both lists is excluded.

use super::models::Record;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl RecordFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    /// Build from `--include-types=a,b` / `--exclude-types=c` style values.
    pub fn from_lists(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self::new(
            include.map(parse_list).unwrap_or_default(),
            exclude.map(parse_list).unwrap_or_default(),
        )
    }

    pub fn admits(&self, record: &Record) -> bool {
        if self.exclude.contains(&record.category) {
            return false;
        }
        self.include.is_empty() || self.include.contains(&record.category)
    }

    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        records.into_iter().filter(|r| self.admits(r)).collect()
    }

    pub fn is_passthrough(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn include(&self) -> impl Iterator<Item = &str> {
        self.include.iter().map(String::as_str)
    }

    pub fn exclude(&self) -> impl Iterator<Item = &str> {
        self.exclude.iter().map(String::as_str)
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.category.as_str()).collect()
    }

    fn sample() -> Vec<Record> {
        ["user", "workout", "userMemory", "other"]
            .iter()
            .enumerate()
            .map(|(i, c)| Record::new(format!("r{i}"), *c))
            .collect()
    }

    #[test]
    fn test_exclude_then_include() {
        let filter = RecordFilter::new(["workout", "userMemory"], ["user"]);
        let kept = filter.apply(sample());
        assert_eq!(categories(&kept), vec!["workout", "userMemory"]);
    }

    #[test]
    fn test_exclude_overrides_include() {
        let filter = RecordFilter::new(["user", "workout"], ["user"]);
        let kept = filter.apply(sample());
        assert_eq!(categories(&kept), vec!["workout"]);
    }

    #[test]
    fn test_empty_include_keeps_survivors() {
        let filter = RecordFilter::new(Vec::<String>::new(), ["user"]);
        let kept = filter.apply(sample());
        assert_eq!(categories(&kept), vec!["workout", "userMemory", "other"]);
    }

    #[test]
    fn test_passthrough() {
        let filter = RecordFilter::default();
        assert!(filter.is_passthrough());
        assert_eq!(filter.apply(sample()).len(), 4);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("user, workout,,"), vec!["user", "workout"]);
        assert!(parse_list("").is_empty());

        let filter = RecordFilter::from_lists(Some("workout"), Some("user,other"));
        assert_eq!(filter.exclude().collect::<Vec<_>>(), vec!["other", "user"]);
    }
}
