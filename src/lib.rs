//! Flight ML - пайплайн задержек рейсов: загрузка, признаки,
//! классификация задержек и кластеризация аэропортов

pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod preprocessing;
pub mod storage;
pub mod tracking;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Error, ErrorCategory, Result};
pub use ingest::FlightDataLoader;
pub use models::*;
pub use pipeline::{Pipeline, Stage};
pub use preprocessing::*;
pub use storage::{SqlStorage, WriteMode, WritePath};
pub use tracking::{ExperimentSink, Tracker};
pub use types::*;
