//! Кодирование категориальных признаков

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Категория для пустых значений
pub const UNKNOWN_CATEGORY: &str = "UNKNOWN";

/// Отображение категория -> целое число.
/// Категории упорядочены лексикографически и получают коды 0..n.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: BTreeMap<String, usize>,
}

impl LabelEncoder {
    pub fn fit<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut classes: BTreeMap<String, usize> =
            values.into_iter().map(|v| (v.to_string(), 0)).collect();
        for (code, slot) in classes.values_mut().enumerate() {
            *slot = code;
        }
        Self { classes }
    }

    pub fn transform(&self, value: &str) -> Option<usize> {
        self.classes.get(value).copied()
    }

    pub fn inverse_transform(&self, code: usize) -> Option<&str> {
        self.classes
            .iter()
            .find(|(_, &c)| c == code)
            .map(|(name, _)| name.as_str())
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> + '_ {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
