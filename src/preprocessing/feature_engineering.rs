//! Feature engineering: целевая переменная, признаки для классификации
//! и профили аэропортов для кластеризации

use std::collections::{BTreeMap, HashSet};

use ndarray::{Array1, Array2};

use crate::error::{Error, Result};
use crate::preprocessing::encoding::{LabelEncoder, UNKNOWN_CATEGORY};
use crate::tracking::Tracker;
use crate::types::{
    AirportProfile, LabeledDataset, Table, Value, AIRLINE, ARRIVAL_DELAY, DEPARTURE_DELAY,
    DISTANCE, FLIGHT_NUMBER, ORIGIN_AIRPORT, TARGET,
};

/// Порог задержки по умолчанию, минуты
pub const DEFAULT_DELAY_THRESHOLD: f64 = 15.0;

/// Аэропорты с числом рейсов не больше порога отбрасываются как шум
pub const MIN_AIRPORT_FLIGHTS: usize = 50;

/// Признаки для классификации (порядок колонок в X)
pub const SUPERVISED_FEATURES: [&str; 5] = [
    "MONTH",
    "DAY_OF_WEEK",
    AIRLINE,
    DISTANCE,
    "SCHEDULED_DEPARTURE",
];

pub struct FeatureEngineer {
    table: Table,
    tracker: Tracker,
}

impl FeatureEngineer {
    /// Работает с собственной копией таблицы
    pub fn new(table: &Table) -> Self {
        Self {
            table: table.clone(),
            tracker: Tracker::noop(),
        }
    }

    pub fn with_tracker(mut self, tracker: Tracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Бинарная цель: 1, если задержка прилета больше `threshold`, иначе 0.
    /// Нечисловые и пустые задержки считаются нулевыми.
    pub fn create_target(&mut self, threshold: f64) -> Result<&Table> {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(Error::InvalidThreshold(threshold));
        }

        let idx = self.table.require(ARRIVAL_DELAY)?;
        let delays: Vec<f64> = self
            .table
            .column(idx)
            .map(|v| v.as_f64().unwrap_or(0.0))
            .collect();

        let targets = delays
            .iter()
            .map(|&d| Value::Int(i64::from(d > threshold)))
            .collect();

        self.table
            .set_column(ARRIVAL_DELAY, delays.into_iter().map(Value::Float).collect())?;
        self.table.set_column(TARGET, targets)?;

        let delayed = self
            .table
            .column(self.table.require(TARGET)?)
            .filter(|v| **v == Value::Int(1))
            .count();
        tracing::info!(
            "Target '{}' created (> {} min): {} of {} flights delayed",
            TARGET,
            threshold,
            delayed,
            self.table.len()
        );

        Ok(&self.table)
    }

    /// X и y для классификации. Кодировщик авиакомпаний возвращается явно,
    /// чтобы то же отображение можно было применить к новым данным.
    pub fn prepare_supervised_features(&self) -> Result<(LabeledDataset, LabelEncoder)> {
        // Проверяем контракт до любых вычислений
        let feature_idx: Vec<usize> = SUPERVISED_FEATURES
            .iter()
            .map(|name| self.table.require(name))
            .collect::<Result<_>>()?;
        let target_idx = self.table.require(TARGET)?;

        if self.table.is_empty() {
            return Err(Error::EmptyInput("no flights to build features from".to_string()));
        }

        let airline_idx = self.table.require(AIRLINE)?;
        let airlines: Vec<String> = self
            .table
            .column(airline_idx)
            .map(|v| v.as_text().unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()))
            .collect();
        let encoder = LabelEncoder::fit(airlines.iter().map(String::as_str));

        let n_samples = self.table.len();
        let mut features = Array2::zeros((n_samples, feature_idx.len()));
        for i in 0..n_samples {
            for (j, &col) in feature_idx.iter().enumerate() {
                features[[i, j]] = if col == airline_idx {
                    encoder.transform(&airlines[i]).unwrap_or(0) as f64
                } else {
                    // Пропуски заполняются нулем
                    self.table.value(i, col).as_f64().unwrap_or(0.0)
                };
            }
        }

        let targets: Array1<usize> = self
            .table
            .column(target_idx)
            .map(|v| usize::from(v.as_f64().unwrap_or(0.0) > 0.5))
            .collect();

        let feature_names: Vec<String> = SUPERVISED_FEATURES.iter().map(|s| s.to_string()).collect();

        tracing::info!("Registering selected features with the tracker");
        self.tracker
            .log_param("selected_features", &format!("{:?}", feature_names));

        let dataset = LabeledDataset::new(features, targets, feature_names)?;
        Ok((dataset, encoder))
    }

    /// Агрегация по аэропорту вылета. Отсутствующие колонки просто не агрегируются.
    pub fn prepare_unsupervised_features(&self) -> Result<Vec<AirportProfile>> {
        tracing::info!("Aggregating flights by origin airport");

        let airport_idx = self.table.require(ORIGIN_AIRPORT)?;
        let arrival_idx = self.table.column_index(ARRIVAL_DELAY);
        let departure_idx = self.table.column_index(DEPARTURE_DELAY);
        let distance_idx = self.table.column_index(DISTANCE);
        let airline_idx = self.table.column_index(AIRLINE);
        let count_idx = self.table.column_index(FLIGHT_NUMBER);

        let mut groups: BTreeMap<String, AirportAccumulator> = BTreeMap::new();
        for row in self.table.rows() {
            // Как и groupby, строки без ключа пропускаем
            let airport = match row[airport_idx].as_text() {
                Some(airport) => airport,
                None => continue,
            };
            let acc = groups.entry(airport).or_default();

            if let Some(idx) = arrival_idx {
                acc.arrival.push(&row[idx]);
            }
            if let Some(idx) = departure_idx {
                acc.departure.push(&row[idx]);
            }
            if let Some(idx) = distance_idx {
                acc.distance.push(&row[idx]);
            }
            if let Some(airline) = airline_idx.and_then(|idx| row[idx].as_text()) {
                acc.airlines.insert(airline);
            }

            let counted = match count_idx {
                Some(idx) => !row[idx].is_null(),
                None => true,
            };
            if counted {
                acc.flights += 1;
            }
        }

        let total_airports = groups.len();
        let profiles: Vec<AirportProfile> = groups
            .into_iter()
            .filter(|(_, acc)| acc.flights > MIN_AIRPORT_FLIGHTS)
            .map(|(airport, acc)| AirportProfile {
                airport,
                mean_arrival_delay: arrival_idx.map(|_| acc.arrival.mean()),
                mean_departure_delay: departure_idx.map(|_| acc.departure.mean()),
                mean_distance: distance_idx.map(|_| acc.distance.mean()),
                airline_count: airline_idx.map(|_| acc.airlines.len()),
                total_flights: acc.flights,
            })
            .collect();

        tracing::info!(
            "Airport profiles: {} of {} airports have more than {} flights",
            profiles.len(),
            total_airports,
            MIN_AIRPORT_FLIGHTS
        );

        Ok(profiles)
    }
}

#[derive(Default)]
struct AirportAccumulator {
    arrival: RunningMean,
    departure: RunningMean,
    distance: RunningMean,
    airlines: HashSet<String>,
    flights: usize,
}

/// Среднее по числовым значениям; пустые пропускаются
#[derive(Default)]
struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    fn push(&mut self, value: &Value) {
        if let Some(v) = value.as_f64() {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}
