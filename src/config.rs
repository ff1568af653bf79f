//! Конфигурация пайплайна: значения по умолчанию, JSON-файл и
//! переопределения из переменных окружения `FLIGHT_ML_*`

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "FLIGHT_ML_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Исходный CSV с рейсами
    pub csv_path: PathBuf,
    pub database_url: String,
    /// Корень локального трекинга; `None` отключает запись
    pub tracking_dir: Option<PathBuf>,
    /// Размер случайной выборки при загрузке; `None` - все строки
    pub sample_size: Option<usize>,
    /// Порог задержки прилета, минуты
    pub delay_threshold: f64,
    pub n_estimators: usize,
    pub seed: u64,
    pub max_k: usize,
    pub n_clusters: usize,
    pub run_clustering: bool,
    /// Логистическая регрессия как базовая линия рядом со случайным лесом
    pub train_baseline: bool,
    /// Дополнительные попытки каждой стадии
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("data/flights.csv"),
            database_url: "sqlite://flights.db".to_string(),
            tracking_dir: Some(PathBuf::from("mlruns")),
            sample_size: Some(50_000),
            delay_threshold: 15.0,
            n_estimators: 50,
            seed: 42,
            max_k: 8,
            n_clusters: 3,
            run_clustering: true,
            train_baseline: true,
            retries: 1,
            retry_delay_secs: 300,
        }
    }
}

impl PipelineConfig {
    /// Загружает JSON; отсутствующие поля берутся по умолчанию
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Файл (если задан) плюс переменные окружения
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Переопределения `FLIGHT_ML_<FIELD>`; источник переменных передается явно
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("CSV_PATH") {
            self.csv_path = PathBuf::from(v);
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = var("TRACKING_DIR") {
            self.tracking_dir = optional(&v).map(PathBuf::from);
        }
        if let Some(v) = var("SAMPLE_SIZE") {
            self.sample_size = optional(&v).map(|s| parse("SAMPLE_SIZE", s)).transpose()?;
        }
        if let Some(v) = var("DELAY_THRESHOLD") {
            self.delay_threshold = parse("DELAY_THRESHOLD", &v)?;
        }
        if let Some(v) = var("N_ESTIMATORS") {
            self.n_estimators = parse("N_ESTIMATORS", &v)?;
        }
        if let Some(v) = var("SEED") {
            self.seed = parse("SEED", &v)?;
        }
        if let Some(v) = var("MAX_K") {
            self.max_k = parse("MAX_K", &v)?;
        }
        if let Some(v) = var("N_CLUSTERS") {
            self.n_clusters = parse("N_CLUSTERS", &v)?;
        }
        if let Some(v) = var("RUN_CLUSTERING") {
            self.run_clustering = parse("RUN_CLUSTERING", &v)?;
        }
        if let Some(v) = var("TRAIN_BASELINE") {
            self.train_baseline = parse("TRAIN_BASELINE", &v)?;
        }
        if let Some(v) = var("RETRIES") {
            self.retries = parse("RETRIES", &v)?;
        }
        if let Some(v) = var("RETRY_DELAY_SECS") {
            self.retry_delay_secs = parse("RETRY_DELAY_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.delay_threshold.is_finite() || self.delay_threshold < 0.0 {
            return Err(Error::InvalidThreshold(self.delay_threshold));
        }
        if self.n_estimators == 0 {
            return Err(Error::Config("n_estimators must be positive".to_string()));
        }
        if self.max_k == 0 || self.n_clusters == 0 {
            return Err(Error::Config("max_k and n_clusters must be positive".to_string()));
        }
        if self.sample_size == Some(0) {
            return Err(Error::Config("sample_size must be positive or absent".to_string()));
        }
        Ok(())
    }
}

/// Пустая строка и `none` означают отсутствие значения
fn optional(value: &str) -> Option<&str> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(value)
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!("{}{} has invalid value '{}'", ENV_PREFIX, name, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_pipeline_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.delay_threshold, 15.0);
        assert_eq!(config.sample_size, Some(50_000));
        assert_eq!(config.n_estimators, 50);
        assert_eq!(config.retries, 1);
        assert_eq!(config.retry_delay_secs, 300);
        assert!(config.train_baseline);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"csv_path": "/data/flights.csv", "n_clusters": 4, "sample_size": null}}"#)
            .unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.csv_path, PathBuf::from("/data/flights.csv"));
        assert_eq!(config.n_clusters, 4);
        assert_eq!(config.sample_size, None);
        assert_eq!(config.max_k, 8);
    }

    #[test]
    fn env_overrides_fields() {
        let mut config = PipelineConfig::default();
        config
            .apply_env(env(&[
                ("FLIGHT_ML_DATABASE_URL", "sqlite::memory:"),
                ("FLIGHT_ML_SAMPLE_SIZE", "none"),
                ("FLIGHT_ML_DELAY_THRESHOLD", "30"),
                ("FLIGHT_ML_RUN_CLUSTERING", "false"),
                ("FLIGHT_ML_TRACKING_DIR", ""),
                ("FLIGHT_ML_TRAIN_BASELINE", "false"),
            ]))
            .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.sample_size, None);
        assert_eq!(config.delay_threshold, 30.0);
        assert!(!config.run_clustering);
        assert_eq!(config.tracking_dir, None);
        assert!(!config.train_baseline);
    }

    #[test]
    fn bad_env_value_is_a_config_error() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(env(&[("FLIGHT_ML_MAX_K", "eight")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("FLIGHT_ML_MAX_K")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = PipelineConfig {
            delay_threshold: -1.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidThreshold(_))));

        let config = PipelineConfig {
            n_clusters: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = PipelineConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
