/// ML модели: классификаторы, метрики и кластеризация

pub mod classifier;
pub mod forest;
pub mod logistic;
pub mod metrics;
pub mod supervised;
pub mod unsupervised;

pub use classifier::Classifier;
pub use forest::RandomForest;
pub use logistic::LogisticRegression;
pub use metrics::{silhouette_score, ClassificationReport};
pub use supervised::SupervisedModeler;
pub use unsupervised::{ClusteringResult, UnsupervisedModeler};
