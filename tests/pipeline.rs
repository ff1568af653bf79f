//! Полный прогон пайплайна на синтетическом CSV

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use flight_ml::pipeline::{
    CLUSTERS_RELATION, GOLD_RELATION, MODEL_NAME, RAW_RELATION, SILVER_RELATION,
};
use flight_ml::{Pipeline, PipelineConfig, Stage, CLUSTER, TARGET};
use tempfile::TempDir;

const HEADER: &str = "YEAR,MONTH,DAY,DAY_OF_WEEK,AIRLINE,FLIGHT_NUMBER,TAIL_NUMBER,ORIGIN_AIRPORT,\
DESTINATION_AIRPORT,SCHEDULED_DEPARTURE,DEPARTURE_DELAY,DISTANCE,ARRIVAL_DELAY,DIVERTED,CANCELLED";

const AIRPORTS: [&str; 4] = ["ATL", "ORD", "DFW", "LAX"];
const FLIGHTS_PER_AIRPORT: usize = 80;

/// Четыре крупных аэропорта, один мелкий и три отмененных рейса.
/// Задержка определяется временем вылета: вечерние рейсы опаздывают.
fn write_flights(dir: &Path) -> PathBuf {
    let airlines = ["AA", "DL", "UA"];
    let mut csv = String::from(HEADER);

    for (a, airport) in AIRPORTS.iter().enumerate() {
        for i in 0..FLIGHTS_PER_AIRPORT {
            let delayed = i % 4 == 0;
            let departure = if delayed { 1800 + i } else { 700 + i };
            let distance = 300 + 400 * a + (i % 10) * 20;
            let (dep_delay, arr_delay) = match (delayed, i) {
                (false, 1) => (String::new(), String::new()),
                (true, _) => ((25 + a * 5).to_string(), (30 + a * 10).to_string()),
                (false, _) => ((i % 7).to_string(), format!("-{}", i % 5)),
            };
            write!(
                csv,
                "\n2015,{},{},{},{},{},N{},{},SEA,{},{},{},{},0,0",
                1 + i % 12,
                1 + i % 28,
                1 + i % 7,
                airlines[i % 3],
                100 + i,
                i,
                airport,
                departure,
                dep_delay,
                distance,
                arr_delay
            )
            .unwrap();
        }
    }

    for i in 0..10 {
        write!(csv, "\n2015,3,{},2,B6,{},N9,BTV,JFK,1000,3,266,4,0,0", 1 + i, 900 + i).unwrap();
    }
    csv.push_str("\n2015,1,1,4,AA,1,N1,ATL,SEA,0900,,300,,0,1");
    csv.push_str("\n2015,1,1,4,AA,2,N2,ORD,SEA,0900,,700,,1,0");
    csv.push_str("\n2015,1,1,4,AA,3,N3,DFW,SEA,0900,,1100,,1,0");

    let path = dir.join("flights.csv");
    fs::write(&path, csv).unwrap();
    path
}

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        csv_path: write_flights(dir.path()),
        database_url: format!("sqlite://{}", dir.path().join("flights.db").display()),
        tracking_dir: Some(dir.path().join("mlruns")),
        sample_size: None,
        n_estimators: 25,
        retries: 0,
        retry_delay_secs: 0,
        ..PipelineConfig::default()
    }
}

/// Каталоги run-ов одного эксперимента
fn runs(root: &Path, experiment: &str) -> Vec<PathBuf> {
    fs::read_dir(root.join(experiment))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

#[tokio::test]
async fn full_run_materializes_every_relation() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let tracking = config.tracking_dir.clone().unwrap();
    let pipeline = Pipeline::connect(config).await.unwrap();

    assert_eq!(pipeline.stages().last(), Some(&Stage::Cluster));
    pipeline.run_all().await.unwrap();

    let storage = pipeline.storage();
    let completed = AIRPORTS.len() * FLIGHTS_PER_AIRPORT + 10;

    let raw = storage.read(RAW_RELATION).await.unwrap();
    assert_eq!(raw.len(), completed);
    // Стадия preprocess копирует raw как есть
    let silver = storage.read(SILVER_RELATION).await.unwrap();
    assert_eq!(silver, raw);

    let gold = storage.read(GOLD_RELATION).await.unwrap();
    assert_eq!(gold.len(), completed);
    assert_eq!(gold.columns().last().map(String::as_str), Some(TARGET));
    assert_eq!(gold.columns().len(), 6);

    // BTV (10 рейсов) не проходит порог в 50 рейсов
    let clusters = storage.read(CLUSTERS_RELATION).await.unwrap();
    assert_eq!(clusters.len(), AIRPORTS.len());
    assert!(clusters.has_column(CLUSTER));

    let training = runs(&tracking, "flight_delay_training");
    assert_eq!(training.len(), 1);
    assert!(training[0]
        .join("models")
        .join(format!("{}.json", MODEL_NAME))
        .is_file());
    assert!(training[0]
        .join("artifacts/feature_importance/feature_importances.csv")
        .is_file());

    let params = fs::read_to_string(training[0].join("params.json")).unwrap();
    assert!(params.contains("baseline_accuracy"));
    assert!(params.contains("baseline_macro_f1"));

    let features = runs(&tracking, "flight_delay_features");
    let params = fs::read_to_string(features[0].join("params.json")).unwrap();
    assert!(params.contains("target_threshold"));
    assert!(params.contains("selected_features"));
    let sample = fs::read_to_string(features[0].join("artifacts/gold_samples/gold_sample.csv")).unwrap();
    assert_eq!(sample.lines().count(), 101);
}

#[tokio::test]
async fn stages_can_run_one_by_one() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::connect(PipelineConfig {
        tracking_dir: None,
        ..config(&dir)
    })
    .await
    .unwrap();

    assert_eq!(pipeline.extract().await.unwrap(), 330);
    assert_eq!(pipeline.preprocess().await.unwrap(), 330);
    assert_eq!(pipeline.features().await.unwrap(), 330);

    let report = pipeline.train().await.unwrap();
    assert_eq!(report.macro_avg.support, 99);
    assert!(report.accuracy > 0.8, "accuracy {}", report.accuracy);

    let result = pipeline.cluster().await.unwrap();
    assert_eq!(result.labels.len(), AIRPORTS.len());
    assert!(result.silhouette.is_some());
}

#[tokio::test]
async fn sampling_limits_raw_rows() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::connect(PipelineConfig {
        sample_size: Some(100),
        tracking_dir: None,
        ..config(&dir)
    })
    .await
    .unwrap();

    assert_eq!(pipeline.extract().await.unwrap(), 100);
    let raw = pipeline.storage().read(RAW_RELATION).await.unwrap();
    assert_eq!(raw.len(), 100);
}
