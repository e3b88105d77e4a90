use crate::errors::{AppError, AppResult};
use crate::identity::{KpiKey, SegmentFilter};
use crate::models::{FindOrCreateKpiRequest, KpiOutcome, KpiRecord, KpiSettings};
use crate::period::standardize_range;
use crate::store::KpiStore;
use crate::trend::trend_or_flat;
use chrono::Utc;
use std::sync::Arc;

/// Turns a freshly computed KPI value into at most one stored record per
/// canonical key.
///
/// There is no lock: a concurrent writer is detected through the store's
/// uniqueness guarantee and resolved by looking the winner up again. Store
/// failures never escape; the worst case is an outcome with no record.
pub struct KpiMemoizer {
    store: Arc<dyn KpiStore>,
    settings: KpiSettings,
}

impl KpiMemoizer {
    pub fn new(store: Arc<dyn KpiStore>, settings: KpiSettings) -> Self {
        Self { store, settings }
    }

    /// Only caller contract violations are returned as errors.
    pub fn find_or_create(&self, request: &FindOrCreateKpiRequest) -> AppResult<KpiOutcome> {
        validate_request(request)?;
        let period = standardize_range(request.period_start, request.period_end)?;
        let key = KpiKey::new(
            &request.kpi_type,
            &request.name,
            &request.site_id,
            period,
            request.segment_id.as_deref(),
            &self.settings,
        );
        let id = key.id();

        match self.resolve(&key, &id, request) {
            Ok(outcome) => Ok(outcome),
            Err(error) if error.is_contract_violation() => Err(error),
            Err(error) => {
                tracing::warn!(kpi_id = %id, site_id = %key.site_id, error = %error, "kpi resolution failed; attempting recovery lookup");
                Ok(self.recover(&key, &id))
            }
        }
    }

    fn resolve(&self, key: &KpiKey, id: &str, request: &FindOrCreateKpiRequest) -> AppResult<KpiOutcome> {
        if let Some(existing) = self.store.get_by_id(id)? {
            tracing::debug!(kpi_id = %id, "kpi found by id");
            return Ok(KpiOutcome::found(existing));
        }

        if let Some(existing) = self.store.find_by_attributes(key)? {
            tracing::debug!(kpi_id = %existing.id, computed_id = %id, "kpi found by attributes");
            return Ok(KpiOutcome::found(existing));
        }

        if !self.may_write(request) {
            tracing::debug!(kpi_id = %id, "no writer for missing kpi; skipping create");
            return Ok(KpiOutcome::unavailable());
        }

        let record = build_record(key, id, request);
        match self.store.upsert_by_id(&record) {
            Ok(stored) => {
                tracing::info!(
                    kpi_id = %stored.id,
                    site_id = %stored.site_id,
                    period_type = stored.period_type.as_str(),
                    "kpi created"
                );
                Ok(KpiOutcome::created(stored))
            }
            Err(error) => {
                tracing::warn!(
                    kpi_id = %id,
                    uniqueness_violation = error.is_uniqueness_violation(),
                    error = %error,
                    "kpi upsert failed; looking for a concurrent writer's row"
                );
                Ok(self.recover(key, id))
            }
        }
    }

    fn recover(&self, key: &KpiKey, id: &str) -> KpiOutcome {
        match self.store.find_by_attributes(key) {
            Ok(Some(existing)) => {
                tracing::info!(kpi_id = %existing.id, computed_id = %id, "kpi recovered after failure");
                KpiOutcome::found(existing)
            }
            Ok(None) => KpiOutcome::unavailable(),
            Err(error) => {
                tracing::warn!(kpi_id = %id, error = %error, "kpi recovery lookup failed");
                KpiOutcome::unavailable()
            }
        }
    }

    fn may_write(&self, request: &FindOrCreateKpiRequest) -> bool {
        let has_writer = request
            .user_id
            .as_deref()
            .is_some_and(|user_id| !user_id.trim().is_empty());
        has_writer && self.settings.writes_enabled
    }
}

fn validate_request(request: &FindOrCreateKpiRequest) -> AppResult<()> {
    for (field, value) in [
        ("siteId", &request.site_id),
        ("type", &request.kpi_type),
        ("name", &request.name),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::InvalidRequest(format!("{field} must not be blank")));
        }
    }
    if !request.value.is_finite() {
        return Err(AppError::InvalidRequest(format!("value {} is not finite", request.value)));
    }
    if let Some(previous) = request.previous_value.filter(|previous| !previous.is_finite()) {
        return Err(AppError::InvalidRequest(format!("previousValue {previous} is not finite")));
    }
    Ok(())
}

fn build_record(key: &KpiKey, id: &str, request: &FindOrCreateKpiRequest) -> KpiRecord {
    let mut metadata = match request.metadata.clone() {
        Some(serde_json::Value::Object(map)) => map,
        Some(serde_json::Value::Null) | None => serde_json::Map::new(),
        Some(other) => {
            let mut map = serde_json::Map::new();
            map.insert("annotation".to_string(), other);
            map
        }
    };
    metadata.insert(
        "periodType".to_string(),
        serde_json::Value::from(key.period.period_type.as_str()),
    );
    metadata.insert(
        "requestedStart".to_string(),
        serde_json::Value::from(request.period_start.to_rfc3339()),
    );
    metadata.insert(
        "requestedEnd".to_string(),
        serde_json::Value::from(request.period_end.to_rfc3339()),
    );

    let now = Utc::now();
    KpiRecord {
        id: id.to_string(),
        kpi_type: key.kpi_type.clone(),
        name: key.name.clone(),
        value: request.value,
        previous_value: request.previous_value,
        trend: trend_or_flat(request.value, request.previous_value),
        period_type: key.period.period_type,
        period_start: key.period.start,
        period_end: key.period.end,
        segment_id: match &key.segment {
            SegmentFilter::Unsegmented => request.segment_id.clone(),
            SegmentFilter::Segment(segment) => Some(segment.clone()),
        },
        segment_key: key.segment.key().to_string(),
        site_id: key.site_id.clone(),
        user_id: request.user_id.clone(),
        metadata: serde_json::Value::Object(metadata),
        is_highlighted: request.is_highlighted.unwrap_or(false),
        target_value: request.target_value,
        benchmark: request.benchmark,
        unit: request.unit.clone(),
        description: request.description.clone(),
        created_at: now,
        updated_at: now,
    }
}
