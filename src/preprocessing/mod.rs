/// Модуль предобработки данных

pub mod encoding;
pub mod feature_engineering;
pub mod normalization;

pub use encoding::LabelEncoder;
pub use feature_engineering::FeatureEngineer;
pub use normalization::StandardScaler;
