//! Оркестрация стадий: extract -> preprocess -> features -> train (+ cluster).
//!
//! Каждая стадия читает вход из хранилища и пишет туда же свой результат,
//! поэтому стадии можно запускать и по отдельности.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::ingest::FlightDataLoader;
use crate::models::{
    ClassificationReport, ClusteringResult, LogisticRegression, RandomForest, SupervisedModeler,
    UnsupervisedModeler,
};
use crate::preprocessing::FeatureEngineer;
use crate::storage::{SqlStorage, WriteMode};
use crate::tracking::Tracker;
use crate::types::{AirportProfile, LabeledDataset, Table, TARGET};

pub const RAW_RELATION: &str = "raw_flights";
pub const SILVER_RELATION: &str = "silver_flights";
pub const GOLD_RELATION: &str = "gold_features";
pub const CLUSTERS_RELATION: &str = "airport_clusters";

pub const FEATURES_EXPERIMENT: &str = "flight_delay_features";
pub const TRAINING_EXPERIMENT: &str = "flight_delay_training";
pub const CLUSTERING_EXPERIMENT: &str = "flight_delay_clustering";

pub const MODEL_NAME: &str = "random_forest_model";
pub const BASELINE_NAME: &str = "LogisticRegression";
pub const GOLD_SAMPLE_ROWS: usize = 100;

const SCHEDULE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Preprocess,
    Features,
    Train,
    Cluster,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Extract => "extract_data",
            Stage::Preprocess => "preprocess_data",
            Stage::Features => "feature_engineering",
            Stage::Train => "train_model",
            Stage::Cluster => "cluster_airports",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    storage: SqlStorage,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, storage: SqlStorage) -> Self {
        Self { config, storage }
    }

    /// Подключается к хранилищу из конфигурации
    pub async fn connect(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let storage = SqlStorage::connect(&config.database_url).await?;
        Ok(Self::new(config, storage))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn storage(&self) -> &SqlStorage {
        &self.storage
    }

    /// Стадии одного прогона в порядке выполнения
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::Extract, Stage::Preprocess, Stage::Features, Stage::Train];
        if self.config.run_clustering {
            stages.push(Stage::Cluster);
        }
        stages
    }

    /// CSV -> `raw_flights`
    pub async fn extract(&self) -> Result<usize> {
        tracing::info!("Starting extraction...");
        let loader = FlightDataLoader::new(&self.config.csv_path);
        let records = loader.load(self.config.sample_size)?;
        if records.is_empty() {
            return Err(Error::EmptyInput(format!(
                "no completed flights in {}",
                loader.file_path().display()
            )));
        }

        let table = Table::from_records(&records);
        self.storage.write(&table, RAW_RELATION, WriteMode::Replace).await?;
        Ok(table.len())
    }

    /// `raw_flights` -> `silver_flights` без изменений. Очистка уже сделана
    /// при загрузке, а ячейки хранятся текстом и разбираются при чтении
    /// числовыми аксессорами.
    pub async fn preprocess(&self) -> Result<usize> {
        tracing::info!("Starting preprocessing...");
        let silver = self.storage.read(RAW_RELATION).await?;
        self.storage.write(&silver, SILVER_RELATION, WriteMode::Replace).await?;
        Ok(silver.len())
    }

    /// `silver_flights` -> цель и признаки -> `gold_features`
    pub async fn features(&self) -> Result<usize> {
        tracing::info!("Starting feature engineering...");
        let tracker = self.tracker(FEATURES_EXPERIMENT);
        let silver = self.storage.read(SILVER_RELATION).await?;

        let mut engineer = FeatureEngineer::new(&silver).with_tracker(tracker.clone());
        engineer.create_target(self.config.delay_threshold)?;
        tracker.log_param("target_threshold", &self.config.delay_threshold.to_string());

        let (dataset, encoder) = engineer.prepare_supervised_features()?;
        let gold = dataset.to_table();
        self.storage.write(&gold, GOLD_RELATION, WriteMode::Replace).await?;

        // Артефакты необязательны: ошибка записи только логируется
        let sample = self.scratch_file("gold_sample.csv").and_then(|path| {
            gold.head(GOLD_SAMPLE_ROWS).write_csv(&path)?;
            Ok(path)
        });
        match sample {
            Ok(path) => tracker.log_artifact(&path, Some("gold_samples")),
            Err(e) => tracing::warn!("Could not write gold sample: {}", e),
        }

        let encoder_file = self.scratch_file("airline_encoder.json").and_then(|path| {
            std::fs::write(&path, serde_json::to_vec_pretty(&encoder)?)?;
            Ok(path)
        });
        match encoder_file {
            Ok(path) => tracker.log_artifact(&path, Some("encoders")),
            Err(e) => tracing::warn!("Could not write airline encoder: {}", e),
        }

        Ok(gold.len())
    }

    /// `gold_features` -> разбиение -> случайный лес -> отчет
    pub async fn train(&self) -> Result<ClassificationReport> {
        tracing::info!("Starting model training...");
        let tracker = self.tracker(TRAINING_EXPERIMENT);
        let gold = self.storage.read(GOLD_RELATION).await?;
        let dataset = LabeledDataset::from_table(&gold, TARGET)?;

        let mut modeler = SupervisedModeler::new(&dataset)?;
        let forest = RandomForest::new(self.config.n_estimators, self.config.seed);
        let report = modeler.train_evaluate("RandomForest", forest)?;

        tracker.log_param("n_estimators", &self.config.n_estimators.to_string());
        tracker.log_param("accuracy", &format!("{:.4}", report.accuracy));

        // Базовая линия для сравнения; ее ошибка стадию не роняет
        if self.config.train_baseline {
            match modeler.train_evaluate(BASELINE_NAME, LogisticRegression::default()) {
                Ok(baseline) => {
                    tracker.log_param("baseline_accuracy", &format!("{:.4}", baseline.accuracy));
                    tracker.log_param("baseline_macro_f1", &format!("{:.4}", baseline.macro_avg.f1));
                }
                Err(e) => tracing::warn!("Baseline {} failed: {}", BASELINE_NAME, e),
            }
        }

        let feature_names = modeler.feature_names().to_vec();
        if let Some(ranked) = modeler.feature_importance("RandomForest", &feature_names)? {
            match self.write_importances(&ranked) {
                Ok(path) => tracker.log_artifact(&path, Some("feature_importance")),
                Err(e) => tracing::warn!("Could not write feature importances: {}", e),
            }
        }

        if let Some(model) = modeler.take_model("RandomForest") {
            tracker.log_model(MODEL_NAME, &model.describe());
        }

        Ok(report)
    }

    /// `silver_flights` -> профили аэропортов -> k-means -> `airport_clusters`
    pub async fn cluster(&self) -> Result<ClusteringResult> {
        tracing::info!("Starting airport clustering...");
        let tracker = self.tracker(CLUSTERING_EXPERIMENT);
        let silver = self.storage.read(SILVER_RELATION).await?;

        let profiles = FeatureEngineer::new(&silver).prepare_unsupervised_features()?;
        let modeler = UnsupervisedModeler::new(&AirportProfile::to_table(&profiles))?;

        let max_k = self.config.max_k.min(profiles.len());
        let curve = modeler.elbow_curve(max_k)?;
        match self.write_elbow(&curve) {
            Ok(path) => tracker.log_artifact(&path, Some("elbow")),
            Err(e) => tracing::warn!("Could not write elbow curve: {}", e),
        }

        let result = modeler.cluster(self.config.n_clusters)?;
        self.storage
            .write(&result.table, CLUSTERS_RELATION, WriteMode::Replace)
            .await?;

        tracker.log_param("n_clusters", &self.config.n_clusters.to_string());
        tracker.log_param(
            "silhouette",
            &result
                .silhouette
                .map_or_else(|| "undefined".to_string(), |s| format!("{:.4}", s)),
        );

        Ok(result)
    }

    pub async fn run_stage(&self, stage: Stage) -> Result<()> {
        match stage {
            Stage::Extract => self.extract().await.map(drop),
            Stage::Preprocess => self.preprocess().await.map(drop),
            Stage::Features => self.features().await.map(drop),
            Stage::Train => self.train().await.map(drop),
            Stage::Cluster => self.cluster().await.map(drop),
        }
    }

    /// Стадия с `retries` повторами и паузой `retry_delay_secs` между ними
    pub async fn run_stage_with_retry(&self, stage: Stage) -> Result<()> {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match self.run_stage(stage).await {
                Ok(()) => {
                    tracing::info!("Stage {} finished", stage);
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "Stage {} failed (attempt {}/{}): {}. Retrying in {}s",
                        stage,
                        attempt,
                        attempts,
                        e,
                        self.config.retry_delay_secs
                    );
                    tokio::time::sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("Stage {} failed after {} attempt(s): {}", stage, attempt, e);
                    return Err(e);
                }
            }
        }
    }

    /// Первая попытка плюс `retries` повторов
    pub fn attempts(&self) -> u32 {
        self.config.retries.saturating_add(1)
    }

    /// Все стадии по порядку; следующая не начинается, пока не завершена предыдущая
    pub async fn run_all(&self) -> Result<()> {
        for stage in self.stages() {
            self.run_stage_with_retry(stage).await?;
        }
        tracing::info!("Pipeline run completed");
        Ok(())
    }

    /// Ежедневный запуск. Ошибка прогона не останавливает расписание.
    /// `max_runs` ограничивает число прогонов (`None` - бесконечно).
    pub async fn run_daily(&self, max_runs: Option<usize>) -> Result<()> {
        let mut ticker = tokio::time::interval(SCHEDULE_PERIOD);
        let mut runs = 0usize;
        while max_runs.map_or(true, |max| runs < max) {
            ticker.tick().await;
            runs += 1;
            tracing::info!("Scheduled run #{} started", runs);
            if let Err(e) = self.run_all().await {
                tracing::error!("Scheduled run #{} failed: {}", runs, e);
            }
        }
        Ok(())
    }

    fn tracker(&self, experiment: &str) -> Tracker {
        Tracker::local_or_noop(self.config.tracking_dir.as_deref(), experiment)
    }

    /// Временный файл артефакта до копирования в трекер
    fn scratch_file(&self, name: &str) -> Result<PathBuf> {
        let dir = match &self.config.tracking_dir {
            Some(root) => root.join(".scratch"),
            None => std::env::temp_dir().join("flight-ml"),
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join(name))
    }

    fn write_importances(&self, ranked: &[(String, f64)]) -> Result<PathBuf> {
        let path = self.scratch_file("feature_importances.csv")?;
        write_pairs(
            &path,
            ["feature", "importance"],
            ranked.iter().map(|(f, i)| (f.clone(), i.to_string())),
        )?;
        Ok(path)
    }

    fn write_elbow(&self, curve: &[(usize, f64)]) -> Result<PathBuf> {
        let path = self.scratch_file("elbow_curve.csv")?;
        write_pairs(
            &path,
            ["k", "inertia"],
            curve.iter().map(|(k, i)| (k.to_string(), i.to_string())),
        )?;
        Ok(path)
    }
}

fn write_pairs<I>(path: &Path, header: [&str; 2], rows: I) -> Result<()>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(header)?;
    for (a, b) in rows {
        writer.write_record([a, b])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clustering_stage_is_optional() {
        let config = PipelineConfig {
            database_url: "sqlite::memory:".to_string(),
            run_clustering: false,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::connect(config).await.unwrap();
        assert_eq!(
            pipeline.stages(),
            vec![Stage::Extract, Stage::Preprocess, Stage::Features, Stage::Train]
        );
        assert_eq!(Stage::Train.to_string(), "train_model");
    }

    #[tokio::test]
    async fn failing_stage_gives_up_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            csv_path: dir.path().join("missing.csv"),
            database_url: "sqlite::memory:".to_string(),
            tracking_dir: None,
            retries: 2,
            retry_delay_secs: 0,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::connect(config).await.unwrap();

        let err = pipeline.run_stage_with_retry(Stage::Extract).await.unwrap_err();
        assert!(matches!(err, Error::Csv(_)));
        assert!(pipeline.run_all().await.is_err());
    }

    #[tokio::test]
    async fn attempts_saturate_at_max_retries() {
        let config = PipelineConfig {
            database_url: "sqlite::memory:".to_string(),
            tracking_dir: None,
            retries: u32::MAX,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::connect(config).await.unwrap();
        assert_eq!(pipeline.attempts(), u32::MAX);

        let config = PipelineConfig {
            retries: 0,
            ..pipeline.config().clone()
        };
        let pipeline = Pipeline::connect(config).await.unwrap();
        assert_eq!(pipeline.attempts(), 1);
    }

    #[tokio::test]
    async fn stages_need_their_input_relation() {
        let config = PipelineConfig {
            database_url: "sqlite::memory:".to_string(),
            tracking_dir: None,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::connect(config).await.unwrap();
        assert!(matches!(pipeline.train().await, Err(Error::Sql(_))));
    }
}
