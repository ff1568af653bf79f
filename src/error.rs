//! Ошибки пайплайна

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Класс ошибки: определяет, как стадия реагирует на сбой
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Нарушен контракт входных данных (нет колонки, пустой вход)
    DataContract,
    /// Данных недостаточно для стратификации или кластеризации
    InsufficientData,
    Model,
    Storage,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required column `{0}`")]
    MissingColumn(String),

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("row has {got} values but the table has {expected} columns")]
    RowWidth { expected: usize, got: usize },

    #[error("invalid delay threshold {0}: must be a finite non-negative number")]
    InvalidThreshold(f64),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid cluster count k={k} for {rows} rows")]
    InvalidK { k: usize, rows: usize },

    #[error("unknown model `{0}`")]
    UnknownModel(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("invalid relation name `{0}`")]
    InvalidRelation(String),

    #[error("write to `{relation}` failed (bulk: {bulk}; row-by-row: {fallback})")]
    StorageWrite {
        relation: String,
        bulk: String,
        fallback: String,
    },

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MissingColumn(_)
            | Error::EmptyInput(_)
            | Error::RowWidth { .. }
            | Error::InvalidThreshold(_) => ErrorCategory::DataContract,
            Error::InsufficientData(_) | Error::InvalidK { .. } => ErrorCategory::InsufficientData,
            Error::UnknownModel(_) | Error::Model(_) => ErrorCategory::Model,
            Error::InvalidRelation(_) | Error::StorageWrite { .. } | Error::Sql(_) => {
                ErrorCategory::Storage
            }
            Error::Csv(_) | Error::Io(_) | Error::Json(_) | Error::Config(_) => ErrorCategory::Io,
        }
    }

    /// Обертка для ошибок linfa и прочих моделей
    pub(crate) fn model(err: impl std::fmt::Display) -> Self {
        Error::Model(err.to_string())
    }
}
