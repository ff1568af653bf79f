/// CLI пайплайна задержек рейсов

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flight_ml::{Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "flight-ml")]
#[command(about = "Flight delay pipeline: CSV -> SQL -> features -> models")]
#[command(version)]
struct Cli {
    /// JSON-файл конфигурации
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Исходный CSV с рейсами
    #[arg(long, global = true)]
    csv_path: Option<PathBuf>,

    /// URL базы, например sqlite://flights.db
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Каталог локального трекинга экспериментов
    #[arg(long, global = true)]
    tracking_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// CSV -> raw_flights
    Extract {
        /// Размер случайной выборки
        #[arg(short, long)]
        sample_size: Option<usize>,

        /// Загрузить все строки без выборки
        #[arg(long, conflicts_with = "sample_size")]
        all: bool,
    },

    /// raw_flights -> silver_flights
    Preprocess,

    /// silver_flights -> gold_features
    Features {
        /// Порог задержки прилета, минуты
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Обучение случайного леса на gold_features
    Train {
        #[arg(short, long)]
        n_estimators: Option<usize>,
    },

    /// Кластеризация аэропортов
    Cluster {
        /// Число кластеров
        #[arg(short, long)]
        k: Option<usize>,

        /// Максимальное k для метода локтя
        #[arg(long)]
        max_k: Option<usize>,
    },

    /// Все стадии один раз
    Run,

    /// Все стадии каждые 24 часа
    Schedule {
        /// Остановиться после N прогонов
        #[arg(long)]
        max_runs: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Инициализация логирования
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config =
        PipelineConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = cli.csv_path {
        config.csv_path = path;
    }
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(dir) = cli.tracking_dir {
        config.tracking_dir = Some(dir);
    }

    match &cli.command {
        Commands::Extract { sample_size, all } => {
            if *all {
                config.sample_size = None;
            } else if sample_size.is_some() {
                config.sample_size = *sample_size;
            }
        }
        Commands::Features { threshold: Some(t) } => config.delay_threshold = *t,
        Commands::Train { n_estimators: Some(n) } => config.n_estimators = *n,
        Commands::Cluster { k, max_k } => {
            if let Some(k) = k {
                config.n_clusters = *k;
            }
            if let Some(max_k) = max_k {
                config.max_k = *max_k;
            }
        }
        _ => {}
    }

    let pipeline = Pipeline::connect(config)
        .await
        .context("Failed to connect to storage")?;

    match cli.command {
        Commands::Extract { .. } => {
            let rows = pipeline.extract().await?;
            tracing::info!("Extracted {} flights", rows);
        }
        Commands::Preprocess => {
            let rows = pipeline.preprocess().await?;
            tracing::info!("Preprocessed {} flights", rows);
        }
        Commands::Features { .. } => {
            let rows = pipeline.features().await?;
            tracing::info!("Built features for {} flights", rows);
        }
        Commands::Train { .. } => {
            let report = pipeline.train().await?;
            println!("{}", report);
        }
        Commands::Cluster { .. } => {
            let result = pipeline.cluster().await?;
            for (label, means) in result.cluster_means() {
                tracing::info!("Cluster {}: {:?}", label, means);
            }
            match result.silhouette {
                Some(score) => println!("silhouette: {:.3}", score),
                None => println!("silhouette: undefined"),
            }
        }
        Commands::Run => pipeline.run_all().await?,
        Commands::Schedule { max_runs } => pipeline.run_daily(max_runs).await?,
    }

    Ok(())
}
