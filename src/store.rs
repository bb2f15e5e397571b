use crate::errors::AppResult;
use crate::models::{Record, RecordFilter, RecordKey};

/// Paged, newest-first access to the record store. Calls may block on I/O and
/// are only ever made from the coordinator's worker lane.
pub trait RecordStore: Send + Sync {
    /// Number of records matching `filter`.
    fn count(&self, filter: &RecordFilter) -> AppResult<usize>;

    /// Up to `limit` records starting at `offset`, by key descending. Fewer
    /// than `limit` means the end of the data was reached.
    fn load_page(&self, limit: usize, offset: usize, filter: &RecordFilter) -> AppResult<Vec<Record>>;

    /// Fails with `NotFound` when no record has `key`.
    fn delete(&self, key: &RecordKey) -> AppResult<()>;
}
