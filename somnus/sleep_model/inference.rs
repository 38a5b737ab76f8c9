use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    bundle::{ArtifactBundle, BundleStore},
    classifier::Classifier,
    error::{ArtifactError, PredictionError, SchemaError},
    features::FeatureVectorBuilder,
    schema::SleepRecord,
    telemetry::{event, log, ModelTelemetry},
};

/// Label plus optional confidence, shaped as the prediction response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Decoded sleep-disorder label.
    pub prediction: String,
    /// Highest class probability; absent when the classifier has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Loaded bundle serving predictions. Immutable after load.
#[derive(Debug)]
pub struct InferenceService {
    bundle: ArtifactBundle,
    bundle_dir: PathBuf,
    telemetry: Option<ModelTelemetry>,
}

impl InferenceService {
    /// Resolves `location` (bundle directory or store root) and loads it.
    pub fn load(location: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        Self::load_inner(location.as_ref(), None)
    }

    /// Like [`Self::load`], reporting through `telemetry`.
    pub fn load_with_telemetry(
        location: impl AsRef<Path>,
        telemetry: ModelTelemetry,
    ) -> Result<Self, ArtifactError> {
        Self::load_inner(location.as_ref(), Some(telemetry))
    }

    fn load_inner(location: &Path, telemetry: Option<ModelTelemetry>) -> Result<Self, ArtifactError> {
        let bundle_dir = BundleStore::resolve(location)?;
        let bundle = match ArtifactBundle::load(&bundle_dir) {
            Ok(bundle) => bundle,
            Err(err) => {
                log(
                    telemetry.as_ref(),
                    LogLevel::Error,
                    "bundle_load_failed",
                    json!({ "path": bundle_dir.display().to_string(), "error": err.to_string() }),
                );
                return Err(err);
            }
        };
        let payload = json!({
            "run_id": bundle.run_id(),
            "path": bundle_dir.display().to_string(),
            "algorithm": bundle.classifier().algorithm(),
        });
        log(telemetry.as_ref(), LogLevel::Info, "bundle_loaded", payload.clone());
        event(telemetry.as_ref(), "model.bundle.loaded", payload);
        Ok(Self {
            bundle,
            bundle_dir,
            telemetry,
        })
    }

    /// Serves an in-memory bundle.
    #[must_use]
    pub fn from_bundle(bundle: ArtifactBundle) -> Self {
        Self {
            bundle,
            bundle_dir: PathBuf::new(),
            telemetry: None,
        }
    }

    /// Loaded bundle.
    #[must_use]
    pub const fn bundle(&self) -> &ArtifactBundle {
        &self.bundle
    }

    /// Directory the bundle was loaded from (empty for in-memory bundles).
    #[must_use]
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// Encodes, scales, classifies and decodes one record.
    pub fn predict(&self, record: &SleepRecord) -> Result<PredictionResult, PredictionError> {
        let result = self.predict_inner(record);
        if let Err(err) = &result {
            log(
                self.telemetry.as_ref(),
                LogLevel::Debug,
                "prediction_rejected",
                json!({ "error": err.to_string() }),
            );
        }
        result
    }

    fn predict_inner(&self, record: &SleepRecord) -> Result<PredictionResult, PredictionError> {
        let bundle = &self.bundle;
        let vector = FeatureVectorBuilder::new(bundle.schema(), bundle.encoders()).build(record)?;
        let scaled = bundle.scaler().transform(&vector)?;
        let classifier = bundle.classifier();
        if scaled.len() != classifier.n_features() {
            return Err(SchemaError::DimensionMismatch {
                expected: classifier.n_features(),
                actual: scaled.len(),
            }
            .into());
        }
        let code = classifier.predict(&scaled);
        let prediction = bundle.encoders().labels()?.decode(code)?.to_owned();
        let confidence = classifier
            .predict_proba(&scaled)
            .map(|probabilities| probabilities.into_iter().fold(0.0, f64::max).clamp(0.0, 1.0));
        Ok(PredictionResult {
            prediction,
            confidence,
        })
    }

    /// Predicts each record independently.
    #[must_use]
    pub fn predict_batch(
        &self,
        records: &[SleepRecord],
    ) -> Vec<Result<PredictionResult, PredictionError>> {
        records.iter().map(|record| self.predict(record)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc, thread};

    use super::*;
    use crate::{
        bundle::tests::sample_bundle,
        classifier::ClassifierConfig,
        config::TrainingConfig,
        dataset::{tests::fixture_path, TrainingDataset},
        forest::RandomForestConfig,
        schema::tests::engineer,
        training::TrainingPipeline,
    };
    use shared_event_bus::MemoryEventBus;
    use tempfile::{tempdir, TempDir};

    fn trained_store() -> TempDir {
        let tmp = tempdir().unwrap();
        let config = TrainingConfig {
            classifier: ClassifierConfig::RandomForest(RandomForestConfig {
                n_estimators: 25,
                ..RandomForestConfig::default()
            }),
            ..TrainingConfig::default()
        };
        let dataset = TrainingDataset::from_csv_path(fixture_path()).unwrap();
        TrainingPipeline::new(config)
            .train_and_commit(&dataset, &BundleStore::new(tmp.path()))
            .unwrap();
        tmp
    }

    #[test]
    fn predicts_the_reference_record() {
        let store = trained_store();
        let service = InferenceService::load(store.path()).unwrap();
        let result = service.predict(&engineer()).unwrap();
        assert!(["None", "Sleep Apnea", "Insomnia"].contains(&result.prediction.as_str()));
        let confidence = result.confidence.unwrap();
        assert!((0.0..=1.0).contains(&confidence));

        let response = serde_json::to_value(&result).unwrap();
        assert_eq!(response["prediction"], result.prediction.as_str());
        assert!(response["confidence"].is_number());
    }

    #[test]
    fn repeated_predictions_agree() {
        let store = trained_store();
        let service = Arc::new(InferenceService::load(store.path()).unwrap());
        let expected = service.predict(&engineer()).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                thread::spawn(move || service.predict(&engineer()).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn missing_scaler_refuses_to_load() {
        let store = trained_store();
        let dir = BundleStore::resolve(store.path()).unwrap();
        fs::remove_file(dir.join("scaler.json")).unwrap();
        assert!(matches!(
            InferenceService::load(store.path()),
            Err(ArtifactError::Missing { ref artifact, .. }) if artifact == "scaler"
        ));
    }

    #[test]
    fn unseen_category_is_rejected() {
        let service = InferenceService::from_bundle(sample_bundle("run-a"));
        let mut record = engineer();
        record.bmi_category = "Normal Weight".into();
        let err = service.predict(&record).unwrap_err();
        assert!(matches!(
            &err,
            PredictionError::InvalidField { field, source: SchemaError::UnseenCategory { .. } }
                if field == "BMI Category"
        ));
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let service = InferenceService::from_bundle(sample_bundle("run-a"));
        let mut record = engineer();
        record.sleep_duration = f64::INFINITY;
        assert_eq!(
            service.predict(&record).unwrap_err().schema_error(),
            &SchemaError::NonFiniteValue {
                field: "Sleep Duration".into()
            }
        );
    }

    #[test]
    fn classifier_without_probabilities_omits_confidence() {
        let service = InferenceService::from_bundle(sample_bundle("run-a"));
        let result = service.predict(&engineer()).unwrap();
        assert_eq!(result.confidence, None);
        let response = serde_json::to_value(&result).unwrap();
        assert!(response.get("confidence").is_none());
    }

    #[test]
    fn batch_reports_each_record() {
        let service = InferenceService::from_bundle(sample_bundle("run-a"));
        let mut bad = engineer();
        bad.gender = "Unknown".into();
        let results = service.predict_batch(&[engineer(), bad]);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn load_emits_an_event() {
        let store = trained_store();
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = ModelTelemetry::builder("inference")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let service = InferenceService::load_with_telemetry(store.path(), telemetry).unwrap();
        let loaded = bus.of_type("model.bundle.loaded");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].payload["run_id"], service.bundle().run_id());
    }

    #[test]
    fn service_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InferenceService>();
    }
}
