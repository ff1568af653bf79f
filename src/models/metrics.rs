//! Метрики качества: отчет классификации и silhouette для кластеров

#![allow(non_snake_case)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use linfa::metrics::SilhouetteScore;
use linfa::Dataset;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Precision/recall/F1/support по классам, accuracy и средние
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
}

impl ClassificationReport {
    pub fn compute(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> Self {
        // Классы - объединение истинных и предсказанных меток
        let labels: BTreeSet<usize> = y_true.iter().chain(y_pred.iter()).copied().collect();

        let mut tp: BTreeMap<usize, usize> = BTreeMap::new();
        let mut predicted: BTreeMap<usize, usize> = BTreeMap::new();
        let mut actual: BTreeMap<usize, usize> = BTreeMap::new();
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            *actual.entry(t).or_insert(0) += 1;
            *predicted.entry(p).or_insert(0) += 1;
            if t == p {
                *tp.entry(t).or_insert(0) += 1;
            }
        }

        let classes: Vec<ClassMetrics> = labels
            .iter()
            .map(|&label| {
                let hits = tp.get(&label).copied().unwrap_or(0) as f64;
                let support = actual.get(&label).copied().unwrap_or(0);
                let n_pred = predicted.get(&label).copied().unwrap_or(0);

                let precision = ratio(hits, n_pred as f64);
                let recall = ratio(hits, support as f64);
                let f1 = ratio(2.0 * precision * recall, precision + recall);

                ClassMetrics {
                    label,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let total = y_true.len();
        let correct: usize = tp.values().sum();
        let n_classes = classes.len().max(1) as f64;

        let macro_avg = AverageMetrics {
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n_classes,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n_classes,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n_classes,
            support: total,
        };

        let weight = |f: fn(&ClassMetrics) -> f64| {
            ratio(
                classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>(),
                total as f64,
            )
        };
        let weighted_avg = AverageMetrics {
            precision: weight(|c| c.precision),
            recall: weight(|c| c.recall),
            f1: weight(|c| c.f1),
            support: total,
        };

        Self {
            classes,
            accuracy: ratio(correct as f64, total as f64),
            macro_avg,
            weighted_avg,
        }
    }

    pub fn class(&self, label: usize) -> Option<&ClassMetrics> {
        self.classes.iter().find(|c| c.label == label)
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                c.label, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, avg.precision, avg.recall, avg.f1, avg.support
            )?;
        }
        Ok(())
    }
}

fn ratio(num: f64, denom: f64) -> f64 {
    if denom < 1e-10 {
        0.0
    } else {
        num / denom
    }
}

/// Средний silhouette по всем точкам.
///
/// `None`, если различных меток меньше двух или столько же, сколько точек:
/// в этих случаях метрика не определена. Точка в одиночном кластере дает 0.
pub fn silhouette_score(X: &Array2<f64>, labels: &[usize]) -> Option<f64> {
    let n = X.nrows();
    let distinct: BTreeSet<usize> = labels.iter().copied().collect();
    if n != labels.len() || distinct.len() < 2 || distinct.len() >= n {
        return None;
    }

    let cluster_sizes: BTreeMap<usize, usize> = labels.iter().fold(BTreeMap::new(), |mut acc, &l| {
        *acc.entry(l).or_insert(0) += 1;
        acc
    });

    if cluster_sizes.values().all(|&size| size > 1) {
        let dataset = Dataset::new(X.to_owned(), Array1::from(labels.to_vec()));
        if let Some(score) = dataset.silhouette_score().ok().filter(|s| s.is_finite()) {
            return Some(score);
        }
    }

    Some(per_point_silhouette(X, labels, &cluster_sizes))
}

/// Поточечный расчет: одиночные кластеры и совпадающие точки дают 0
fn per_point_silhouette(
    X: &Array2<f64>,
    labels: &[usize],
    cluster_sizes: &BTreeMap<usize, usize>,
) -> f64 {
    let n = X.nrows();
    let distance = |i: usize, j: usize| -> f64 {
        X.row(i)
            .iter()
            .zip(X.row(j).iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    };

    let mut total = 0.0;
    for i in 0..n {
        let own = labels[i];
        if cluster_sizes[&own] == 1 {
            continue;
        }

        let mut sums: BTreeMap<usize, f64> = BTreeMap::new();
        for j in 0..n {
            if i != j {
                *sums.entry(labels[j]).or_insert(0.0) += distance(i, j);
            }
        }

        let a = sums.get(&own).copied().unwrap_or(0.0) / (cluster_sizes[&own] - 1) as f64;
        let b = sums
            .iter()
            .filter(|(&label, _)| label != own)
            .map(|(label, sum)| sum / cluster_sizes[label] as f64)
            .fold(f64::INFINITY, f64::min);

        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    total / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn report_matches_hand_computed_values() {
        let y_true = array![0, 0, 0, 0, 1, 1];
        let y_pred = array![0, 0, 1, 0, 1, 0];
        let report = ClassificationReport::compute(&y_true, &y_pred);

        let zero = report.class(0).unwrap();
        assert!((zero.precision - 0.75).abs() < 1e-12);
        assert!((zero.recall - 0.75).abs() < 1e-12);
        assert_eq!(zero.support, 4);

        let one = report.class(1).unwrap();
        assert!((one.precision - 0.5).abs() < 1e-12);
        assert!((one.recall - 0.5).abs() < 1e-12);
        assert_eq!(one.support, 2);

        assert!((report.accuracy - 4.0 / 6.0).abs() < 1e-12);
        assert!((report.macro_avg.f1 - 0.625).abs() < 1e-12);
        assert!((report.weighted_avg.precision - (0.75 * 4.0 + 0.5 * 2.0) / 6.0).abs() < 1e-12);
    }

    #[test]
    fn never_predicted_class_scores_zero() {
        let report = ClassificationReport::compute(&array![0, 1, 1], &array![0, 0, 0]);
        let one = report.class(1).unwrap();
        assert_eq!(one.precision, 0.0);
        assert_eq!(one.f1, 0.0);
        assert!(report.to_string().contains("weighted avg"));
    }

    #[test]
    fn silhouette_of_well_separated_clusters_is_high() {
        let X = array![[0.0, 0.0], [0.1, 0.0], [10.0, 10.0], [10.1, 10.0]];
        let score = silhouette_score(&X, &[0, 0, 1, 1]).unwrap();
        assert!(score > 0.95);
    }

    #[test]
    fn silhouette_penalises_swapped_labels() {
        let X = array![[0.0, 0.0], [0.1, 0.0], [10.0, 10.0], [10.1, 10.0]];
        let score = silhouette_score(&X, &[0, 1, 0, 1]).unwrap();
        assert!(score < 0.0);
    }

    #[test]
    fn silhouette_is_undefined_for_degenerate_labelings() {
        let X = array![[0.0], [1.0], [2.0]];
        assert_eq!(silhouette_score(&X, &[0, 0, 0]), None);
        assert_eq!(silhouette_score(&X, &[0, 1, 2]), None);
    }

    #[test]
    fn singleton_cluster_contributes_zero() {
        let X = array![[0.0], [0.0], [5.0]];
        // Точки 0 и 1 совпадают: a = 0, b = 5 -> 1; точка 2 одиночная -> 0
        let score = silhouette_score(&X, &[0, 0, 1]).unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn silhouette_matches_per_point_definition() {
        let X = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [6.0, 5.0], [5.0, 6.0], [9.0, 9.0]];
        let labels = [0, 0, 0, 1, 1, 1];
        let sizes: BTreeMap<usize, usize> = [(0, 3), (1, 3)].into_iter().collect();

        let score = silhouette_score(&X, &labels).unwrap();
        let expected = per_point_silhouette(&X, &labels, &sizes);
        assert!(score > 0.5 && score < 1.0, "score {}", score);
        assert!((score - expected).abs() < 1e-9, "{} vs {}", score, expected);
    }
}
