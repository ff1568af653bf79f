//! Общий интерфейс классификаторов

#![allow(non_snake_case)]

use ndarray::{Array1, Array2};

use crate::error::Result;

/// Любой оцениватель с fit/predict. Важности признаков есть не у всех.
pub trait Classifier: Send {
    fn fit(&mut self, X: &Array2<f64>, y: &Array1<usize>) -> Result<()>;

    fn predict(&self, X: &Array2<f64>) -> Result<Array1<usize>>;

    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    /// Сводка модели для трекинга
    fn describe(&self) -> serde_json::Value;
}
