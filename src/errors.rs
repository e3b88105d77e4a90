use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),
    #[error("UNIQUENESS_VIOLATION: {0}")]
    UniquenessViolation(String),
    #[error("MALFORMED_PERIOD: {0}")]
    MalformedPeriod(String),
    #[error("INVALID_REQUEST: {0}")]
    InvalidRequest(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_uniqueness_violation(&self) -> bool {
        matches!(self, Self::UniquenessViolation(_))
    }

    /// Contract violations are the caller's bug and are never absorbed by
    /// the memoizer's recovery paths.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::MalformedPeriod(_) | Self::InvalidRequest(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::UniquenessViolation(value.to_string())
            }
            _ => Self::StoreUnavailable(value.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn constraint_failures_map_to_uniqueness_violation() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .expect("schema");
        let error = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .map_err(AppError::from)
            .expect_err("duplicate insert");
        assert!(error.is_uniqueness_violation());
        assert!(error.to_string().starts_with("UNIQUENESS_VIOLATION"));
    }

    #[test]
    fn other_sqlite_failures_are_store_unavailable() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        let error = conn
            .execute("SELECT * FROM missing_table", [])
            .map_err(AppError::from)
            .expect_err("missing table");
        assert!(matches!(error, AppError::StoreUnavailable(_)));
        assert!(!error.is_contract_violation());
    }
}
