use crate::errors::AppResult;
use crate::identity::KpiKey;
use crate::models::KpiRecord;

/// Persistence boundary for KPI records.
///
/// `upsert_by_id` must be idempotent: when a row with the same id already
/// exists it is returned as stored, never overwritten. A competing row with
/// the same attributes under a different id is reported as
/// [`AppError::UniquenessViolation`](crate::errors::AppError::UniquenessViolation).
pub trait KpiStore: Send + Sync {
    fn get_by_id(&self, id: &str) -> AppResult<Option<KpiRecord>>;

    /// Unsegmented keys match only unsegmented rows, never "any segment".
    fn find_by_attributes(&self, key: &KpiKey) -> AppResult<Option<KpiRecord>>;

    fn upsert_by_id(&self, record: &KpiRecord) -> AppResult<KpiRecord>;
}
