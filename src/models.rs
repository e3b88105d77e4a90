use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
    Custom,
}

impl PeriodType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
            Self::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            "yearly" => Some(Self::Yearly),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// A period snapped to its natural bucket. Boundaries are inclusive UTC dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardizedPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub period_type: PeriodType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kpi_type: String,
    pub name: String,
    pub value: f64,
    pub previous_value: Option<f64>,
    pub trend: f64,
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub segment_id: Option<String>,
    pub segment_key: String,
    pub site_id: String,
    pub user_id: Option<String>,
    pub metadata: serde_json::Value,
    pub is_highlighted: bool,
    pub target_value: Option<f64>,
    pub benchmark: Option<f64>,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOrCreateKpiRequest {
    pub site_id: String,
    pub user_id: Option<String>,
    pub segment_id: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kpi_type: String,
    pub name: String,
    pub value: f64,
    pub previous_value: Option<f64>,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub target_value: Option<f64>,
    pub benchmark: Option<f64>,
    pub is_highlighted: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

/// Result of a find-or-create call. `kpi == None` means "no data this round".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiOutcome {
    pub kpi: Option<KpiRecord>,
    pub created: bool,
}

impl KpiOutcome {
    pub fn found(record: KpiRecord) -> Self {
        Self {
            kpi: Some(record),
            created: false,
        }
    }

    pub fn created(record: KpiRecord) -> Self {
        Self {
            kpi: Some(record),
            created: true,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            kpi: None,
            created: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KpiSettings {
    pub writes_enabled: bool,
    pub unsegmented_sentinels: Vec<String>,
}

impl Default for KpiSettings {
    fn default() -> Self {
        Self {
            writes_enabled: true,
            unsegmented_sentinels: vec!["all".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListKpisFilters {
    pub site_id: String,
    #[serde(rename = "type")]
    pub kpi_type: Option<String>,
    pub period_type: Option<PeriodType>,
    /// Only rows whose period overlaps `[from, to]`.
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub highlighted_only: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
