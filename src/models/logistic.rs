//! Логистическая регрессия (базовая модель)

#![allow(non_snake_case)]

use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression as LinfaLogistic};
use ndarray::{Array1, Array2};

use crate::error::{Error, Result};
use crate::models::classifier::Classifier;
use crate::preprocessing::StandardScaler;

/// Признаки стандартизуются внутри модели, иначе LBFGS плохо сходится
/// на колонках вроде DISTANCE и SCHEDULED_DEPARTURE
pub struct LogisticRegression {
    max_iterations: u64,
    alpha: f64,
    scaler: StandardScaler,
    model: Option<FittedLogisticRegression<f64, usize>>,
}

impl LogisticRegression {
    pub fn new(max_iterations: u64) -> Self {
        Self {
            max_iterations,
            alpha: 1.0,
            scaler: StandardScaler::new(),
            model: None,
        }
    }

    /// Сила L2-регуляризации
    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, X: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
        let X_scaled = self.scaler.fit_transform(X)?;
        let dataset = Dataset::new(X_scaled, y.clone());

        let model = LinfaLogistic::default()
            .alpha(self.alpha)
            .max_iterations(self.max_iterations)
            .fit(&dataset)
            .map_err(Error::model)?;

        self.model = Some(model);
        Ok(())
    }

    fn predict(&self, X: &Array2<f64>) -> Result<Array1<usize>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| Error::Model("logistic regression not trained".to_string()))?;
        let X_scaled = self.scaler.transform(X)?;
        Ok(model.predict(&X_scaled))
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": "logistic_regression",
            "max_iterations": self.max_iterations,
            "alpha": self.alpha,
            "intercept": self.model.as_ref().map(|m| m.intercept()),
            "coefficients": self.model.as_ref().map(|m| m.params().to_vec()),
        })
    }
}
