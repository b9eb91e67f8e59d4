use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} entity `{id}` already exists")]
    DuplicateId { kind: &'static str, id: String },

    #[error("unexpected store layout: {0}")]
    Layout(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum HabitError {
    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("unknown periodicity `{0}`")]
    InvalidPeriodicity(String),

    #[error("habit field `{0}` cannot be edited")]
    UnknownField(String),

    #[error("habit field `{field}` has an invalid value: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("habit `{0}` already exists")]
    DuplicateHabit(String),

    #[error("user `{0}` already exists")]
    DuplicateUser(String),

    #[error("user `{0}` not found")]
    UserNotFound(String),

    #[error("habit `{0}` not found")]
    HabitNotFound(String),

    #[error("unable to hash credential: {0}")]
    Credential(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = HabitError> = std::result::Result<T, E>;
