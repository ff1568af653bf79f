//! Кластеризация профилей (K-Means из linfa-clustering)

#![allow(non_snake_case)]

use std::collections::BTreeMap;

use linfa::prelude::*;
use linfa_clustering::{KMeans, KMeansInit};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Error, Result};
use crate::models::metrics::silhouette_score;
use crate::preprocessing::StandardScaler;
use crate::types::{Table, Value, CLUSTER, ORIGIN_AIRPORT};

pub const KMEANS_SEED: u64 = 42;
/// Число случайных инициализаций для устойчивости
pub const KMEANS_RUNS: usize = 10;

const KMEANS_TOLERANCE: f64 = 1e-4;
const KMEANS_MAX_ITER: u64 = 300;

/// Результат одного запуска K-Means
struct KMeansFit {
    centroids: Array2<f64>,
    labels: Array1<usize>,
    inertia: f64,
}

#[derive(Debug, Clone)]
pub struct ClusteringResult {
    /// Входная таблица с колонкой `CLUSTER`
    pub table: Table,
    pub labels: Vec<usize>,
    /// Центроиды в стандартизованном пространстве
    pub centroids: Array2<f64>,
    pub inertia: f64,
    /// `None`, когда метрика не определена (меньше двух кластеров)
    pub silhouette: Option<f64>,
    pub feature_columns: Vec<String>,
}

impl ClusteringResult {
    /// Средние исходных признаков по каждому кластеру
    pub fn cluster_means(&self) -> BTreeMap<usize, Vec<(String, f64)>> {
        let indices: Vec<Option<usize>> = self
            .feature_columns
            .iter()
            .map(|c| self.table.column_index(c))
            .collect();

        let mut sums: BTreeMap<usize, (Vec<f64>, usize)> = BTreeMap::new();
        for (row, &label) in self.table.rows().iter().zip(self.labels.iter()) {
            let entry = sums
                .entry(label)
                .or_insert_with(|| (vec![0.0; indices.len()], 0));
            for (slot, idx) in entry.0.iter_mut().zip(indices.iter()) {
                *slot += idx.and_then(|i| row[i].as_f64()).unwrap_or(0.0);
            }
            entry.1 += 1;
        }

        sums.into_iter()
            .map(|(label, (totals, count))| {
                let means = self
                    .feature_columns
                    .iter()
                    .cloned()
                    .zip(totals.into_iter().map(|t| t / count as f64))
                    .collect();
                (label, means)
            })
            .collect()
    }
}

pub struct UnsupervisedModeler {
    table: Table,
    feature_columns: Vec<String>,
    scaler: StandardScaler,
    X_scaled: Array2<f64>,
}

impl UnsupervisedModeler {
    /// Признаки - все числовые колонки, кроме ключа аэропорта
    pub fn new(table: &Table) -> Result<Self> {
        Self::with_key_columns(table, &[ORIGIN_AIRPORT])
    }

    pub fn with_key_columns(table: &Table, key_columns: &[&str]) -> Result<Self> {
        if table.is_empty() {
            return Err(Error::EmptyInput("no rows to cluster".to_string()));
        }

        let feature_columns: Vec<String> = table
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, name)| !key_columns.contains(&name.as_str()))
            .filter(|(idx, _)| table.column(*idx).all(|v| v.as_f64().is_some()))
            .map(|(_, name)| name.clone())
            .collect();

        if feature_columns.is_empty() {
            return Err(Error::EmptyInput("no numeric columns to cluster".to_string()));
        }

        let X = numeric_matrix(table, &feature_columns)?;
        let mut scaler = StandardScaler::new();
        let X_scaled = scaler.fit_transform(&X)?;

        Ok(Self {
            table: table.clone(),
            feature_columns,
            scaler,
            X_scaled,
        })
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn scaled(&self) -> &Array2<f64> {
        &self.X_scaled
    }

    /// Тот же скейлер для новой таблицы с теми же колонками
    pub fn transform(&self, table: &Table) -> Result<Array2<f64>> {
        let X = numeric_matrix(table, &self.feature_columns)?;
        self.scaler.transform(&X)
    }

    /// Метод локтя: инерция для k = 1..=max_k, не возрастает по k.
    /// Выбор k остается за вызывающим.
    pub fn elbow_curve(&self, max_k: usize) -> Result<Vec<(usize, f64)>> {
        let rows = self.X_scaled.nrows();
        if max_k < 1 || max_k > rows {
            return Err(Error::InvalidK { k: max_k, rows });
        }

        let mut curve = Vec::with_capacity(max_k);
        let mut previous: Option<KMeansFit> = None;

        for k in 1..=max_k {
            let mut best = self.fit_kmeans(k, None)?;

            // Старт от центроидов k-1 плюс худшая по расстоянию точка:
            // инерция такого решения не больше инерции для k-1
            if let Some(init) = previous.as_ref().and_then(|prev| self.warm_start(prev)) {
                match self.fit_kmeans(k, Some(init)) {
                    Ok(warm) if warm.inertia < best.inertia => best = warm,
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Warm-started k-means failed for k={}: {}", k, e),
                }
            }

            tracing::debug!("Elbow: k={} inertia={:.4}", k, best.inertia);
            curve.push((k, best.inertia));
            previous = Some(best);
        }

        Ok(curve)
    }

    /// K-Means с выбранным k, метки кластеров и silhouette
    pub fn cluster(&self, k: usize) -> Result<ClusteringResult> {
        let rows = self.X_scaled.nrows();
        if k < 1 || k > rows {
            return Err(Error::InvalidK { k, rows });
        }

        let fit = self.fit_kmeans(k, None)?;
        let labels: Vec<usize> = fit.labels.to_vec();
        let silhouette = silhouette_score(&self.X_scaled, &labels);

        match silhouette {
            Some(score) => tracing::info!(
                "Clustering done with K={}. Silhouette score: {:.3}",
                k,
                score
            ),
            None => tracing::warn!(
                "Clustering done with K={}; silhouette score is undefined for this labeling",
                k
            ),
        }

        let mut table = self.table.clone();
        table.set_column(
            CLUSTER,
            labels.iter().map(|&l| Value::Int(l as i64)).collect(),
        )?;

        Ok(ClusteringResult {
            table,
            labels,
            centroids: fit.centroids,
            inertia: fit.inertia,
            silhouette,
            feature_columns: self.feature_columns.clone(),
        })
    }

    fn fit_kmeans(&self, k: usize, init: Option<Array2<f64>>) -> Result<KMeansFit> {
        let dataset = DatasetBase::from(self.X_scaled.clone());
        let rng = StdRng::seed_from_u64(KMEANS_SEED);

        let params = KMeans::params_with_rng(k, rng)
            .tolerance(KMEANS_TOLERANCE)
            .max_n_iterations(KMEANS_MAX_ITER);
        let params = match init {
            Some(centroids) => params
                .n_runs(1)
                .init_method(KMeansInit::Precomputed(centroids)),
            None => params.n_runs(KMEANS_RUNS),
        };

        let model = params.fit(&dataset).map_err(Error::model)?;
        let labels: Array1<usize> = model.predict(&self.X_scaled);
        let centroids = model.centroids().to_owned();
        let inertia = inertia(&self.X_scaled, &centroids, &labels);

        Ok(KMeansFit {
            centroids,
            labels,
            inertia,
        })
    }

    /// Начальные центроиды для k+1: прежние плюс самая удаленная от своего центра точка
    fn warm_start(&self, prev: &KMeansFit) -> Option<Array2<f64>> {
        let (worst, worst_dist) = self
            .X_scaled
            .rows()
            .into_iter()
            .zip(prev.labels.iter())
            .map(|(row, &label)| squared_distance(row.iter(), prev.centroids.row(label).iter()))
            .enumerate()
            .fold((0usize, 0.0f64), |best, (i, d)| if d > best.1 { (i, d) } else { best });

        // Все точки совпадают с центроидами: новый центр ничего не даст
        if worst_dist <= 1e-12 {
            return None;
        }

        let mut init = prev.centroids.clone();
        init.push_row(self.X_scaled.row(worst)).ok()?;
        Some(init)
    }
}

fn numeric_matrix(table: &Table, columns: &[String]) -> Result<Array2<f64>> {
    let indices: Vec<usize> = columns
        .iter()
        .map(|c| table.require(c))
        .collect::<Result<_>>()?;

    let mut X = Array2::zeros((table.len(), indices.len()));
    for (i, row) in table.rows().iter().enumerate() {
        for (j, &col) in indices.iter().enumerate() {
            X[[i, j]] = row[col].as_f64().unwrap_or(0.0);
        }
    }
    Ok(X)
}

fn squared_distance<'a>(
    a: impl Iterator<Item = &'a f64>,
    b: impl Iterator<Item = &'a f64>,
) -> f64 {
    a.zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Сумма квадратов расстояний точек до центров своих кластеров
fn inertia(X: &Array2<f64>, centroids: &Array2<f64>, labels: &Array1<usize>) -> f64 {
    X.axis_iter(Axis(0))
        .zip(labels.iter())
        .map(|(row, &label)| squared_distance(row.iter(), centroids.row(label).iter()))
        .sum()
}
