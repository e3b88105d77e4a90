pub mod db;
pub mod errors;
pub mod identity;
pub mod memoizer;
pub mod models;
pub mod period;
pub mod store;
pub mod trend;

pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::memoizer::KpiMemoizer;
pub use crate::models::{
    FindOrCreateKpiRequest, KpiOutcome, KpiRecord, KpiSettings, ListKpisFilters, PeriodType, StandardizedPeriod,
};
pub use crate::store::KpiStore;

use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Request-facing entry point. Cheap to clone; every call is independent.
#[derive(Clone)]
pub struct KpiEngine {
    store: Arc<dyn KpiStore>,
    db: Option<Arc<Database>>,
}

impl KpiEngine {
    pub fn open(data_dir: &Path) -> AppResult<Self> {
        let db = Arc::new(Database::new(&data_dir.join("kpi.sqlite"))?);
        Ok(Self {
            store: db.clone(),
            db: Some(db),
        })
    }

    /// Engine over a caller-supplied store. Settings stay at their defaults.
    pub fn with_store(store: Arc<dyn KpiStore>) -> Self {
        Self { store, db: None }
    }

    pub fn find_or_create_kpi_blocking(&self, request: &FindOrCreateKpiRequest) -> AppResult<KpiOutcome> {
        KpiMemoizer::new(self.store.clone(), self.settings_or_default()).find_or_create(request)
    }

    pub async fn find_or_create_kpi(&self, request: FindOrCreateKpiRequest) -> AppResult<KpiOutcome> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.find_or_create_kpi_blocking(&request)).await?
    }

    pub fn settings(&self) -> AppResult<KpiSettings> {
        match &self.db {
            Some(db) => db.get_settings(),
            None => Ok(KpiSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<KpiSettings> {
        self.database()?.update_settings(update)
    }

    pub fn list_kpis(&self, filters: &ListKpisFilters) -> AppResult<Vec<KpiRecord>> {
        self.database()?.list_kpis(filters)
    }

    pub fn count_kpis(&self, site_id: &str) -> AppResult<i64> {
        self.database()?.count_kpis(site_id)
    }

    fn database(&self) -> AppResult<&Database> {
        self.db
            .as_deref()
            .ok_or_else(|| AppError::NotFound("engine has no owned database".to_string()))
    }

    fn settings_or_default(&self) -> KpiSettings {
        self.settings().unwrap_or_else(|error| {
            tracing::warn!(error = %error, "failed to read kpi settings; using defaults");
            KpiSettings::default()
        })
    }
}

/// Install a JSON subscriber writing to a daily rolling file under `log_dir`.
/// Level comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "kpi-memo.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return Err(AppError::Internal("tracing already initialised".to_string()));
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{init_tracing, KpiEngine};

    #[test]
    fn tracing_initialises_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        init_tracing(&dir.path().join("logs")).expect("first init");
        assert!(dir.path().join("logs").is_dir());
        assert!(init_tracing(&dir.path().join("logs")).is_err());
    }

    #[test]
    fn open_creates_the_database_under_the_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = KpiEngine::open(&dir.path().join("nested")).expect("engine");
        assert!(dir.path().join("nested").join("kpi.sqlite").exists());
        assert_eq!(engine.count_kpis("site-1").expect("count"), 0);
        assert!(engine.settings().expect("settings").writes_enabled);
    }
}
