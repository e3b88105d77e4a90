use crate::errors::{AppError, AppResult};
use crate::identity::KpiKey;
use crate::models::{KpiRecord, KpiSettings, ListKpisFilters, PeriodType};
use crate::period::{format_period_date, PERIOD_DATE_FORMAT};
use crate::store::KpiStore;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const SETTINGS_KEY: &str = "kpi";
const KPI_COLUMNS: &str = "id, type, name, site_id, user_id, segment_id, segment_key, period_type,
     period_start, period_end, value, previous_value, trend, metadata_json, is_highlighted,
     target_value, benchmark, unit, description, created_at, updated_at";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %journal_mode, "opened kpi database");
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.ensure_default_settings()?;

        Ok(db)
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<KpiSettings> {
        let conn = self.conn.lock().map_err(|_| AppError::StoreUnavailable("database mutex poisoned".to_string()))?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [SETTINGS_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<KpiSettings>(&raw).unwrap_or_default()),
            None => Ok(KpiSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<KpiSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: KpiSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::InvalidRequest(format!("invalid settings: {error}")))?;

        let conn = self.conn.lock().map_err(|_| AppError::StoreUnavailable("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![SETTINGS_KEY, serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::StoreUnavailable("database mutex poisoned".to_string()))?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM settings WHERE key = ?1",
            [SETTINGS_KEY],
            |row| row.get(0),
        )?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    SETTINGS_KEY,
                    serde_json::to_string(&KpiSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }

    // ─── KPI reads ──────────────────────────────────────────────────────────

    pub fn list_kpis(&self, filters: &ListKpisFilters) -> AppResult<Vec<KpiRecord>> {
        let conn = self.conn.lock().map_err(|_| AppError::StoreUnavailable("database mutex poisoned".to_string()))?;
        let mut query = format!("SELECT {KPI_COLUMNS} FROM kpis WHERE site_id = ?");
        let mut params_vec: Vec<String> = vec![filters.site_id.clone()];

        if let Some(kpi_type) = &filters.kpi_type {
            query.push_str(" AND type = ?");
            params_vec.push(kpi_type.clone());
        }
        if let Some(period_type) = filters.period_type {
            query.push_str(" AND period_type = ?");
            params_vec.push(period_type.as_str().to_string());
        }
        if let Some(from) = filters.from {
            query.push_str(" AND period_end >= ?");
            params_vec.push(format_period_date(from));
        }
        if let Some(to) = filters.to {
            query.push_str(" AND period_start <= ?");
            params_vec.push(format_period_date(to));
        }
        if filters.highlighted_only.unwrap_or(false) {
            query.push_str(" AND is_highlighted = 1");
        }

        query.push_str(" ORDER BY period_start DESC, name ASC");
        let limit = filters.limit.unwrap_or(100);
        let offset = filters.offset.unwrap_or(0);
        query.push_str(" LIMIT ? OFFSET ?");

        let mut statement = conn.prepare(&query)?;
        let mut dyn_params: Vec<&dyn rusqlite::ToSql> = params_vec
            .iter()
            .map(|param| param as &dyn rusqlite::ToSql)
            .collect();
        dyn_params.push(&limit);
        dyn_params.push(&offset);

        let rows = statement.query_map(rusqlite::params_from_iter(dyn_params), parse_kpi_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn count_kpis(&self, site_id: &str) -> AppResult<i64> {
        let conn = self.conn.lock().map_err(|_| AppError::StoreUnavailable("database mutex poisoned".to_string()))?;
        conn.query_row(
            "SELECT COUNT(1) FROM kpis WHERE site_id = ?1",
            [site_id],
            |row| row.get(0),
        )
        .map_err(AppError::from)
    }
}

impl KpiStore for Database {
    fn get_by_id(&self, id: &str) -> AppResult<Option<KpiRecord>> {
        let conn = self.conn.lock().map_err(|_| AppError::StoreUnavailable("database mutex poisoned".to_string()))?;
        conn.query_row(
            &format!("SELECT {KPI_COLUMNS} FROM kpis WHERE id = ?1"),
            [id],
            parse_kpi_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn find_by_attributes(&self, key: &KpiKey) -> AppResult<Option<KpiRecord>> {
        let conn = self.conn.lock().map_err(|_| AppError::StoreUnavailable("database mutex poisoned".to_string()))?;
        conn.query_row(
            &format!(
                "SELECT {KPI_COLUMNS} FROM kpis
                 WHERE type = ?1 AND name = ?2 AND site_id = ?3
                   AND period_start = ?4 AND period_end = ?5 AND segment_key = ?6
                 LIMIT 1"
            ),
            params![
                key.kpi_type,
                key.name,
                key.site_id,
                format_period_date(key.period.start),
                format_period_date(key.period.end),
                key.segment.key().as_ref(),
            ],
            parse_kpi_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn upsert_by_id(&self, record: &KpiRecord) -> AppResult<KpiRecord> {
        let mut conn = self.conn.lock().map_err(|_| AppError::StoreUnavailable("database mutex poisoned".to_string()))?;
        let tx = conn.transaction()?;
        // An existing id keeps its first-written state, including its trend.
        let inserted = tx.execute(
            "INSERT INTO kpis (
               id, type, name, site_id, user_id, segment_id, segment_key, period_type,
               period_start, period_end, value, previous_value, trend, metadata_json, is_highlighted,
               target_value, benchmark, unit, description, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
             ON CONFLICT(id) DO NOTHING",
            params![
                record.id,
                record.kpi_type,
                record.name,
                record.site_id,
                record.user_id,
                record.segment_id,
                record.segment_key,
                record.period_type.as_str(),
                format_period_date(record.period_start),
                format_period_date(record.period_end),
                record.value,
                record.previous_value,
                record.trend,
                serde_json::to_string(&record.metadata)?,
                record.is_highlighted as i32,
                record.target_value,
                record.benchmark,
                record.unit,
                record.description,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        let stored = tx.query_row(
            &format!("SELECT {KPI_COLUMNS} FROM kpis WHERE id = ?1"),
            [record.id.as_str()],
            parse_kpi_row,
        )?;
        tx.commit()?;

        if inserted == 0 {
            tracing::debug!(kpi_id = %record.id, "upsert hit an existing row; kept stored state");
        }
        Ok(stored)
    }
}

fn parse_kpi_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KpiRecord> {
    Ok(KpiRecord {
        id: row.get(0)?,
        kpi_type: row.get(1)?,
        name: row.get(2)?,
        site_id: row.get(3)?,
        user_id: row.get(4)?,
        segment_id: row.get(5)?,
        segment_key: row.get(6)?,
        period_type: parse_period_type(&row.get::<_, String>(7)?)?,
        period_start: parse_date(&row.get::<_, String>(8)?, 8)?,
        period_end: parse_date(&row.get::<_, String>(9)?, 9)?,
        value: row.get(10)?,
        previous_value: row.get(11)?,
        trend: row.get(12)?,
        metadata: serde_json::from_str::<serde_json::Value>(&row.get::<_, String>(13)?)
            .unwrap_or(serde_json::json!({})),
        is_highlighted: row.get::<_, i64>(14)? != 0,
        target_value: row.get(15)?,
        benchmark: row.get(16)?,
        unit: row.get(17)?,
        description: row.get(18)?,
        created_at: parse_time(&row.get::<_, String>(19)?, 19)?,
        updated_at: parse_time(&row.get::<_, String>(20)?, 20)?,
    })
}

fn parse_period_type(raw: &str) -> rusqlite::Result<PeriodType> {
    PeriodType::parse(raw).ok_or_else(|| invalid_column(7, format!("Unknown period type '{}'", raw)))
}

fn parse_date(raw: &str, index: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, PERIOD_DATE_FORMAT).map_err(|error| invalid_column(index, error.to_string()))
}

fn parse_time(raw: &str, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| invalid_column(index, error.to_string()))
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
