/// Типы данных пайплайна

use std::fmt;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ARRIVAL_DELAY: &str = "ARRIVAL_DELAY";
pub const DEPARTURE_DELAY: &str = "DEPARTURE_DELAY";
pub const DISTANCE: &str = "DISTANCE";
pub const AIRLINE: &str = "AIRLINE";
pub const ORIGIN_AIRPORT: &str = "ORIGIN_AIRPORT";
pub const FLIGHT_NUMBER: &str = "FLIGHT_NUMBER";
pub const TARGET: &str = "IS_DELAYED";
pub const TOTAL_FLIGHTS: &str = "TOTAL_FLIGHTS";
pub const CLUSTER: &str = "CLUSTER";

/// Один рейс после очистки (не отменен и не перенаправлен)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FlightRecord {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub day_of_week: u32,
    pub airline: String,
    pub flight_number: i64,
    pub origin_airport: String,
    pub destination_airport: String,
    pub scheduled_departure: u32, // HHMM
    pub departure_delay: f64,     // минуты
    pub arrival_delay: f64,       // минуты
    pub distance: f64,            // мили
    pub cancelled: u8,
    pub diverted: u8,
}

impl FlightRecord {
    pub const COLUMNS: [&'static str; 14] = [
        "YEAR",
        "MONTH",
        "DAY",
        "DAY_OF_WEEK",
        AIRLINE,
        FLIGHT_NUMBER,
        ORIGIN_AIRPORT,
        "DESTINATION_AIRPORT",
        "SCHEDULED_DEPARTURE",
        DEPARTURE_DELAY,
        ARRIVAL_DELAY,
        DISTANCE,
        "CANCELLED",
        "DIVERTED",
    ];

    /// Значения в порядке `COLUMNS`
    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::Int(self.year as i64),
            Value::Int(self.month as i64),
            Value::Int(self.day as i64),
            Value::Int(self.day_of_week as i64),
            Value::Text(self.airline.clone()),
            Value::Int(self.flight_number),
            Value::Text(self.origin_airport.clone()),
            Value::Text(self.destination_airport.clone()),
            Value::Int(self.scheduled_departure as i64),
            Value::Float(self.departure_delay),
            Value::Float(self.arrival_delay),
            Value::Float(self.distance),
            Value::Int(self.cancelled as i64),
            Value::Int(self.diverted as i64),
        ]
    }
}

/// Ячейка таблицы
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Числовое значение; текст парсится, нечисловой текст дает `None`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) if v.is_nan() => None,
            Value::Float(v) => Some(*v),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|v| !v.is_nan()),
        }
    }

    /// Строковое представление для хранилища; `Null` остается `None`
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Float(v) if v.is_nan() => None,
            other => Some(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Таблица с именованными колонками (строковое хранение по строкам)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn from_records(records: &[FlightRecord]) -> Self {
        let mut table = Table::new(FlightRecord::COLUMNS);
        table.rows = records.iter().map(FlightRecord::to_row).collect();
        table
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::RowWidth {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Индекс обязательной колонки
    pub fn require(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| &row[idx])
    }

    pub fn value(&self, row: usize, col: usize) -> &Value {
        &self.rows[row][col]
    }

    /// Заменяет колонку или добавляет новую в конец
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(Error::RowWidth {
                expected: self.rows.len(),
                got: values.len(),
            });
        }

        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|v| v.as_text().unwrap_or_default()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Матрица признаков X и бинарная цель y
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDataset {
    pub features: Array2<f64>,
    pub targets: Array1<usize>,
    pub feature_names: Vec<String>,
}

impl LabeledDataset {
    pub fn new(
        features: Array2<f64>,
        targets: Array1<usize>,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        if features.nrows() != targets.len() {
            return Err(Error::RowWidth {
                expected: features.nrows(),
                got: targets.len(),
            });
        }
        if features.ncols() != feature_names.len() {
            return Err(Error::RowWidth {
                expected: features.ncols(),
                got: feature_names.len(),
            });
        }
        Ok(Self {
            features,
            targets,
            feature_names,
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Gold-таблица: признаки и цель в одной таблице
    pub fn to_table(&self) -> Table {
        let mut table = Table::new(self.feature_names.iter().cloned().chain([TARGET.to_string()]));
        table.rows = self
            .features
            .rows()
            .into_iter()
            .zip(self.targets.iter())
            .map(|(row, &y)| {
                row.iter()
                    .map(|&v| Value::Float(v))
                    .chain([Value::Int(y as i64)])
                    .collect()
            })
            .collect();
        table
    }

    /// Обратное преобразование: все колонки, кроме `target`, становятся признаками.
    /// Нечисловые значения заменяются нулем.
    pub fn from_table(table: &Table, target: &str) -> Result<Self> {
        let target_idx = table.require(target)?;
        let feature_idx: Vec<usize> = (0..table.columns().len())
            .filter(|&i| i != target_idx)
            .collect();

        let mut features = Array2::zeros((table.len(), feature_idx.len()));
        for (i, row) in table.rows().iter().enumerate() {
            for (j, &col) in feature_idx.iter().enumerate() {
                features[[i, j]] = row[col].as_f64().unwrap_or(0.0);
            }
        }

        let targets: Array1<usize> = table
            .column(target_idx)
            .map(|v| usize::from(v.as_f64().unwrap_or(0.0) > 0.5))
            .collect();

        let feature_names = feature_idx
            .iter()
            .map(|&i| table.columns()[i].clone())
            .collect();

        LabeledDataset::new(features, targets, feature_names)
    }
}

/// Профиль аэропорта вылета.
/// Агрегаты равны `None`, если исходной колонки не было во входной таблице.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportProfile {
    pub airport: String,
    pub mean_arrival_delay: Option<f64>,
    pub mean_departure_delay: Option<f64>,
    pub mean_distance: Option<f64>,
    pub airline_count: Option<usize>,
    pub total_flights: usize,
}

impl AirportProfile {
    /// Таблица профилей; колонка агрегата есть, только если он посчитан
    pub fn to_table(profiles: &[AirportProfile]) -> Table {
        let first = profiles.first();
        let has_arrival = first.map_or(false, |p| p.mean_arrival_delay.is_some());
        let has_departure = first.map_or(false, |p| p.mean_departure_delay.is_some());
        let has_distance = first.map_or(false, |p| p.mean_distance.is_some());
        let has_airlines = first.map_or(false, |p| p.airline_count.is_some());

        let mut columns = vec![ORIGIN_AIRPORT];
        if has_arrival {
            columns.push(ARRIVAL_DELAY);
        }
        if has_departure {
            columns.push(DEPARTURE_DELAY);
        }
        if has_distance {
            columns.push(DISTANCE);
        }
        if has_airlines {
            columns.push(AIRLINE);
        }
        columns.push(TOTAL_FLIGHTS);

        let mut table = Table::new(columns);
        for p in profiles {
            let mut row = vec![Value::Text(p.airport.clone())];
            if has_arrival {
                row.push(p.mean_arrival_delay.map_or(Value::Null, Value::Float));
            }
            if has_departure {
                row.push(p.mean_departure_delay.map_or(Value::Null, Value::Float));
            }
            if has_distance {
                row.push(p.mean_distance.map_or(Value::Null, Value::Float));
            }
            if has_airlines {
                row.push(p.airline_count.map_or(Value::Null, |c| Value::Int(c as i64)));
            }
            row.push(Value::Int(p.total_flights as i64));
            table.rows.push(row);
        }
        table
    }
}
