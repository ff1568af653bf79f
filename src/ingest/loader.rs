//! Загрузка и очистка исходного CSV с рейсами

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::FlightRecord;

pub const SAMPLE_SEED: u64 = 42;

/// Строка файла до очистки: задержки и флаги могут быть пустыми
#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawFlightRow {
    year: i32,
    month: u32,
    day: u32,
    day_of_week: u32,
    airline: String,
    flight_number: i64,
    origin_airport: String,
    destination_airport: String,
    scheduled_departure: u32,
    departure_delay: Option<f64>,
    arrival_delay: Option<f64>,
    distance: f64,
    cancelled: Option<u8>,
    diverted: Option<u8>,
}

impl RawFlightRow {
    fn is_completed(&self) -> bool {
        self.cancelled.unwrap_or(0) == 0 && self.diverted.unwrap_or(0) == 0
    }

    fn into_record(self) -> FlightRecord {
        FlightRecord {
            year: self.year,
            month: self.month,
            day: self.day,
            day_of_week: self.day_of_week,
            airline: self.airline,
            flight_number: self.flight_number,
            origin_airport: self.origin_airport,
            destination_airport: self.destination_airport,
            scheduled_departure: self.scheduled_departure,
            // Пунктуальные рейсы иногда приходят без задержки
            departure_delay: self.departure_delay.unwrap_or(0.0),
            arrival_delay: self.arrival_delay.unwrap_or(0.0),
            distance: self.distance,
            cancelled: self.cancelled.unwrap_or(0),
            diverted: self.diverted.unwrap_or(0),
        }
    }
}

pub struct FlightDataLoader {
    file_path: PathBuf,
}

impl FlightDataLoader {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Читает CSV, убирает отмененные и перенаправленные рейсы.
    /// `sample_size` включает случайную (детерминированную) выборку.
    pub fn load(&self, sample_size: Option<usize>) -> Result<Vec<FlightRecord>> {
        tracing::info!("Loading flights from {}", self.file_path.display());

        let mut reader = csv::Reader::from_path(&self.file_path)?;

        let headers = reader.headers()?.clone();
        for column in FlightRecord::COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(Error::MissingColumn(column.to_string()));
            }
        }

        let mut total = 0usize;
        let mut records = Vec::new();
        for row in reader.deserialize::<RawFlightRow>() {
            let row = row?;
            total += 1;
            if row.is_completed() {
                records.push(row.into_record());
            }
        }
        tracing::info!("Rows in source file: {}", total);

        let records = match sample_size {
            Some(n) if n < records.len() => {
                let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
                let mut slots: Vec<Option<FlightRecord>> = records.into_iter().map(Some).collect();
                let sampled: Vec<FlightRecord> = rand::seq::index::sample(&mut rng, slots.len(), n)
                    .into_iter()
                    .filter_map(|i| slots[i].take())
                    .collect();
                tracing::warn!("Sampling applied: {} rows", n);
                sampled
            }
            Some(n) => {
                tracing::warn!(
                    "Sample size {} is not below the {} available rows, keeping all",
                    n,
                    records.len()
                );
                records
            }
            None => records,
        };

        tracing::info!("Flights loaded: {} rows", records.len());
        Ok(records)
    }
}
