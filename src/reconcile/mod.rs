//! Bulk record reconciliation.
//!
//! A run enumerates a scope, narrows it to a target set (duplicate losers or
//! a category filter), asks the confirmation gate, then applies one bulk
//! mutation batch by batch and folds the outcomes into a [`RunReport`].

pub mod aggregator;
pub mod confirmation;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod filter;
pub mod models;
pub mod mutator;
pub mod resolver;

pub use aggregator::ResultAggregator;
pub use confirmation::{
    ConfirmMode, ConfirmationGate, ConfirmationInput, ScriptedInput, StdinInput,
};
pub use engine::{GroupSummary, ReconciliationEngine, RunReport};
pub use enumerator::{Enumeration, PaginatedEnumerator};
pub use error::{ReconcileError, Result};
pub use filter::RecordFilter;
pub use models::{
    BatchResult, BatchSettings, DuplicateGroup, MutationKind, MutationPlan, RankingMetrics,
    Record, RecordError, Scope, ScopeKind, TimeWindow,
};
pub use mutator::BatchMutator;
pub use resolver::DuplicateResolver;
