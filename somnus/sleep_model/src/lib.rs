#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Somnus sleep-disorder model: feature encoding, scaling, training, artifact bundles, and inference.

/// Error taxonomy shared by every stage.
#[path = "../error.rs"]
pub mod error;

/// Feature schema and typed input record.
#[path = "../schema.rs"]
pub mod schema;

/// Category vocabularies and the encoder set.
#[path = "../encoding.rs"]
pub mod encoding;

/// Record to vector assembly.
#[path = "../features.rs"]
pub mod features;

/// Standard-score feature scaling.
#[path = "../scaler.rs"]
pub mod scaler;

/// Classifier trait and persisted model variants.
#[path = "../classifier.rs"]
pub mod classifier;

/// Random forest classifier.
#[path = "../forest.rs"]
pub mod forest;

/// Label-stratified train/held-out split.
#[path = "../split.rs"]
pub mod split;

/// Held-out evaluation metrics.
#[path = "../metrics.rs"]
pub mod metrics;

/// Historical CSV input.
#[path = "../dataset.rs"]
pub mod dataset;

/// TOML training configuration.
#[path = "../config.rs"]
pub mod config;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Artifact bundle persistence and store.
#[path = "../bundle.rs"]
pub mod bundle;

/// Training pipeline.
#[path = "../training.rs"]
pub mod training;

/// Inference service.
#[path = "../inference.rs"]
pub mod inference;

pub use bundle::{ArtifactBundle, ArtifactKind, BundleManifest, BundleStore};
pub use classifier::{Classifier, ClassifierConfig, ClassifierModel, NearestCentroid};
pub use config::{ScalerFit, TrainingConfig};
pub use dataset::{normalize_label, BmiCanonicalizer, HistoricalRow, TrainingDataset};
pub use encoding::{CategoryVocabulary, EncoderSet};
pub use error::{ArtifactError, PipelineError, PredictionError, SchemaError, TrainingDataError};
pub use features::FeatureVectorBuilder;
pub use forest::{MaxFeatures, RandomForest, RandomForestConfig};
pub use inference::{InferenceService, PredictionResult};
pub use metrics::{ClassMetrics, EvaluationReport};
pub use scaler::{FeatureScaler, ScalerParameters};
pub use schema::{BloodPressure, Feature, FeatureKind, FeatureSchema, SleepRecord, TARGET_FIELD};
pub use split::{stratified_split, DatasetSplit};
pub use telemetry::{ModelTelemetry, ModelTelemetryBuilder};
pub use training::{TrainingOutcome, TrainingPipeline, TrainingRun};
