pub mod config;
pub mod procedures;
pub mod reconcile;
pub mod store;

pub use config::Config;

pub use reconcile::{
    BatchMutator, BatchResult, ConfirmMode, ConfirmationGate, DuplicateResolver, MutationPlan,
    PaginatedEnumerator, ReconcileError, Record, RecordFilter, ResultAggregator, RunReport, Scope,
};

pub use store::{InMemoryStore, ListingCoverage, RemoteStore, StoreError, TableStore, VectorIndexStore};

pub use procedures::{copy_namespace, dedupe_memories, delete_user_records, RunOptions};
