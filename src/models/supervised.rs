//! Обучение и оценка классификаторов на одном стратифицированном разбиении

#![allow(non_snake_case)]

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Error, Result};
use crate::models::classifier::Classifier;
use crate::models::metrics::ClassificationReport;
use crate::types::LabeledDataset;

pub const TEST_SIZE: f64 = 0.3;
pub const SPLIT_SEED: u64 = 42;

pub struct SupervisedModeler {
    X_train: Array2<f64>,
    X_test: Array2<f64>,
    y_train: Array1<usize>,
    y_test: Array1<usize>,
    feature_names: Vec<String>,
    models: HashMap<String, Box<dyn Classifier>>,
    reports: HashMap<String, ClassificationReport>,
}

impl SupervisedModeler {
    /// Разбиение 70/30 с фиксированным seed
    pub fn new(dataset: &LabeledDataset) -> Result<Self> {
        Self::with_split(dataset, TEST_SIZE, SPLIT_SEED)
    }

    pub fn with_split(dataset: &LabeledDataset, test_size: f64, seed: u64) -> Result<Self> {
        if dataset.is_empty() {
            return Err(Error::EmptyInput("no samples to split".to_string()));
        }

        let (train_idx, test_idx) = stratified_split(&dataset.targets, test_size, seed)?;

        tracing::info!(
            "Stratified split: {} train / {} test samples",
            train_idx.len(),
            test_idx.len()
        );

        Ok(Self {
            X_train: dataset.features.select(Axis(0), &train_idx),
            X_test: dataset.features.select(Axis(0), &test_idx),
            y_train: dataset.targets.select(Axis(0), &train_idx),
            y_test: dataset.targets.select(Axis(0), &test_idx),
            feature_names: dataset.feature_names.clone(),
            models: HashMap::new(),
            reports: HashMap::new(),
        })
    }

    pub fn train_size(&self) -> usize {
        self.y_train.len()
    }

    pub fn test_size(&self) -> usize {
        self.y_test.len()
    }

    pub fn train_targets(&self) -> &Array1<usize> {
        &self.y_train
    }

    pub fn test_targets(&self) -> &Array1<usize> {
        &self.y_test
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Обучает модель на train, оценивает на test и сохраняет под `name`
    pub fn train_evaluate<C>(&mut self, name: &str, mut estimator: C) -> Result<ClassificationReport>
    where
        C: Classifier + 'static,
    {
        tracing::info!("Training {}...", name);
        estimator.fit(&self.X_train, &self.y_train)?;
        let predictions = estimator.predict(&self.X_test)?;

        let report = ClassificationReport::compute(&self.y_test, &predictions);
        tracing::info!("Report for {}:\n{}", name, report);

        self.models.insert(name.to_string(), Box::new(estimator));
        self.reports.insert(name.to_string(), report.clone());
        Ok(report)
    }

    pub fn model(&self, name: &str) -> Option<&dyn Classifier> {
        self.models.get(name).map(|m| m.as_ref())
    }

    pub fn report(&self, name: &str) -> Option<&ClassificationReport> {
        self.reports.get(name)
    }

    /// Передает обученную модель дальше (например, в трекер)
    pub fn take_model(&mut self, name: &str) -> Option<Box<dyn Classifier>> {
        self.models.remove(name)
    }

    /// Важности признаков по убыванию; `None`, если модель их не дает
    pub fn feature_importance(
        &self,
        name: &str,
        feature_names: &[String],
    ) -> Result<Option<Vec<(String, f64)>>> {
        let model = self
            .models
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))?;

        let importances = match model.feature_importances() {
            Some(importances) => importances,
            None => return Ok(None),
        };

        let mut pairs: Vec<(String, f64)> = feature_names
            .iter()
            .cloned()
            .zip(importances)
            .collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(Some(pairs))
    }
}

/// Индексы train/test с сохранением пропорций классов.
/// В test каждого класса попадает round(n * test_size), но не меньше одного
/// и не больше n - 1 объекта.
pub fn stratified_split(
    targets: &Array1<usize>,
    test_size: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(Error::InsufficientData(format!(
            "test size {} must lie strictly between 0 and 1",
            test_size
        )));
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in targets.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    if let Some((label, members)) = by_class.iter().find(|(_, members)| members.len() < 2) {
        return Err(Error::InsufficientData(format!(
            "class {} has {} member(s), at least 2 are needed to stratify",
            label,
            members.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for members in by_class.values_mut() {
        members.shuffle(&mut rng);
        let n = members.len();
        let n_test = ((n as f64 * test_size).round() as usize).clamp(1, n - 1);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    // Перемешиваем, чтобы классы не шли блоками
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Ok((train, test))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogisticRegression, RandomForest};

    fn dataset(n: usize, positives: usize) -> LabeledDataset {
        let mut X = Array2::zeros((n, 2));
        let mut y = Array1::zeros(n);
        for i in 0..n {
            let positive = i < positives;
            X[[i, 0]] = if positive { 50.0 + i as f64 } else { i as f64 * 0.1 };
            X[[i, 1]] = (i % 7) as f64;
            y[i] = usize::from(positive);
        }
        LabeledDataset::new(X, y, vec!["DISTANCE".into(), "MONTH".into()]).unwrap()
    }

    fn positive_share(y: &Array1<usize>) -> f64 {
        y.iter().filter(|&&v| v == 1).count() as f64 / y.len() as f64
    }

    #[test]
    fn split_is_seventy_thirty() {
        let data = dataset(100, 30);
        let modeler = SupervisedModeler::new(&data).unwrap();
        assert_eq!(modeler.train_size(), 70);
        assert_eq!(modeler.test_size(), 30);
    }

    #[test]
    fn split_preserves_class_proportions() {
        let data = dataset(1000, 173);
        let modeler = SupervisedModeler::new(&data).unwrap();
        let full = positive_share(&data.targets);

        assert!((positive_share(modeler.train_targets()) - full).abs() < 0.01);
        assert!((positive_share(modeler.test_targets()) - full).abs() < 0.01);
        assert_eq!(modeler.train_size() + modeler.test_size(), 1000);
        assert!((modeler.test_size() as f64 - 300.0).abs() <= 1.0);
    }

    #[test]
    fn split_is_reproducible_and_disjoint() {
        let targets = dataset(50, 20).targets;
        let (train_a, test_a) = stratified_split(&targets, TEST_SIZE, SPLIT_SEED).unwrap();
        let (train_b, test_b) = stratified_split(&targets, TEST_SIZE, SPLIT_SEED).unwrap();
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);

        let mut all: Vec<usize> = train_a.iter().chain(test_a.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn lonely_class_cannot_be_stratified() {
        let data = dataset(10, 1);
        assert!(matches!(
            SupervisedModeler::new(&data),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn models_share_the_split_and_are_stored() {
        let data = dataset(120, 40);
        let mut modeler = SupervisedModeler::new(&data).unwrap();

        let forest = modeler
            .train_evaluate("Random Forest", RandomForest::new(10, 42).max_features(Some(2)))
            .unwrap();
        let logistic = modeler
            .train_evaluate("Logistic Regression", LogisticRegression::default())
            .unwrap();

        assert_eq!(forest.macro_avg.support, modeler.test_size());
        assert_eq!(logistic.macro_avg.support, modeler.test_size());
        assert!(forest.accuracy > 0.9);
        assert!(modeler.model("Random Forest").is_some());
        assert!(modeler.report("Logistic Regression").is_some());
    }

    #[test]
    fn feature_importance_is_sorted_descending() {
        let data = dataset(120, 40);
        let mut modeler = SupervisedModeler::new(&data).unwrap();
        modeler
            .train_evaluate("Random Forest", RandomForest::new(10, 42).max_features(Some(2)))
            .unwrap();
        modeler
            .train_evaluate("Logistic Regression", LogisticRegression::default())
            .unwrap();

        let names = modeler.feature_names().to_vec();
        let ranked = modeler
            .feature_importance("Random Forest", &names)
            .unwrap()
            .unwrap();
        assert_eq!(ranked[0].0, "DISTANCE");
        assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));

        assert!(modeler
            .feature_importance("Logistic Regression", &names)
            .unwrap()
            .is_none());
        assert!(matches!(
            modeler.feature_importance("missing", &names),
            Err(Error::UnknownModel(_))
        ));
    }

    #[test]
    fn take_model_hands_over_ownership() {
        let data = dataset(60, 20);
        let mut modeler = SupervisedModeler::new(&data).unwrap();
        modeler
            .train_evaluate("rf", RandomForest::new(5, 1))
            .unwrap();

        let model = modeler.take_model("rf").unwrap();
        assert_eq!(model.describe()["kind"], "random_forest");
        assert!(modeler.model("rf").is_none());
    }
}
