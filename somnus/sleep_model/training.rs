use std::path::PathBuf;

use chrono::Utc;
use ndarray::{Array2, Axis};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use crate::{
    bundle::{ArtifactBundle, BundleStore},
    classifier::Classifier,
    config::{ScalerFit, TrainingConfig},
    dataset::TrainingDataset,
    encoding::EncoderSet,
    error::{PipelineError, SchemaError},
    features::FeatureVectorBuilder,
    metrics::EvaluationReport,
    scaler::FeatureScaler,
    schema::{FeatureSchema, TARGET_FIELD},
    split::{stratified_split, DatasetSplit},
    telemetry::{event, log, ModelTelemetry},
};

/// In-memory result of a training run.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    /// Bundle ready to be committed.
    pub bundle: ArtifactBundle,
    /// Held-out evaluation.
    pub report: EvaluationReport,
    /// Partition membership.
    pub split: DatasetSplit,
    /// Encoded, unscaled feature matrix in dataset row order.
    pub features: Array2<f64>,
    /// Encoded labels in dataset row order.
    pub labels: Vec<usize>,
}

/// Result of a committed training run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Identifier of the committed run.
    pub run_id: String,
    /// Directory the bundle was committed to.
    pub bundle_dir: PathBuf,
    /// Held-out evaluation.
    pub report: EvaluationReport,
}

/// Fits encoders, scaler and classifier from historical rows.
#[derive(Debug, Clone)]
pub struct TrainingPipeline {
    config: TrainingConfig,
    telemetry: Option<ModelTelemetry>,
}

/// Sortable run identifier: UTC timestamp plus a random suffix.
#[must_use]
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

impl TrainingPipeline {
    /// Pipeline with the given settings and no telemetry.
    #[must_use]
    pub const fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: ModelTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &TrainingConfig {
        &self.config
    }

    fn fit_encoders(&self, schema: &FeatureSchema) -> Result<EncoderSet, SchemaError> {
        let mut encoders = EncoderSet::for_schema(schema, TARGET_FIELD);
        for (field, values) in &self.config.vocabularies {
            let admitted =
                field == TARGET_FIELD || schema.categorical_fields().any(|name| name == field);
            if admitted {
                encoders.fit(field, values.iter().cloned())?;
            }
        }
        match encoders.missing_fields().first() {
            Some(field) => Err(SchemaError::UnfittedField {
                field: (*field).to_owned(),
            }),
            None => Ok(encoders),
        }
    }

    /// Runs every training step in memory. Nothing is written.
    pub fn train(&self, dataset: &TrainingDataset) -> Result<TrainingRun, PipelineError> {
        let telemetry = self.telemetry.as_ref();
        self.config.validate().map_err(|err| PipelineError::Config {
            reason: format!("{err:#}"),
        })?;
        let schema = self.config.schema()?;
        log(
            telemetry,
            LogLevel::Info,
            "training_started",
            json!({ "rows": dataset.len(), "features": schema.len(), "algorithm": self.config.classifier.algorithm() }),
        );
        event(
            telemetry,
            "model.training.started",
            json!({ "rows": dataset.len(), "seed": self.config.seed }),
        );

        let encoders = self.fit_encoders(&schema)?;
        let mut rows = 0;
        let mut labels = Vec::with_capacity(dataset.len());
        let mut values = Vec::with_capacity(dataset.len() * schema.len());
        let builder = FeatureVectorBuilder::new(&schema, &encoders);
        for (line, row) in dataset.numbered_rows() {
            let at_line = |source| PipelineError::Row { line, source };
            let label = encoders.encode(TARGET_FIELD, &row.label()).map_err(at_line)?;
            let record = row.to_record(&self.config.bmi_synonyms).map_err(at_line)?;
            values.extend(builder.build(&record).map_err(at_line)?);
            labels.push(label);
            rows += 1;
        }
        let produced = values.len();
        let features = Array2::from_shape_vec((rows, schema.len()), values).map_err(|_| {
            SchemaError::DimensionMismatch {
                expected: rows * schema.len(),
                actual: produced,
            }
        })?;

        let class_names = encoders.labels()?.values().to_vec();
        let columns = schema.names();
        let (scaler, split) = match self.config.scaler_fit {
            ScalerFit::AllRows => {
                let scaler = FeatureScaler::fit(features.view(), &columns)?;
                let split = stratified_split(&labels, &class_names, self.config.test_size, self.config.seed)?;
                (scaler, split)
            }
            ScalerFit::TrainingPartition => {
                let split = stratified_split(&labels, &class_names, self.config.test_size, self.config.seed)?;
                let training_rows = features.select(Axis(0), &split.train);
                (FeatureScaler::fit(training_rows.view(), &columns)?, split)
            }
        };

        let scaled = scaler.transform_matrix(features.view())?;
        let x_train = scaled.select(Axis(0), &split.train);
        let y_train: Vec<usize> = split.train.iter().map(|&row| labels[row]).collect();
        let classifier = self.config.classifier.fit(
            x_train.view(),
            &y_train,
            class_names.len(),
            self.config.seed,
        )?;

        let report = evaluate(&classifier, &scaled, &labels, &split, &class_names);
        self.observe(&report);

        let bundle = ArtifactBundle::new(
            new_run_id(),
            schema,
            scaler,
            encoders,
            classifier,
            Some(report.clone()),
        )?;
        Ok(TrainingRun {
            bundle,
            report,
            split,
            features,
            labels,
        })
    }

    /// Trains and atomically commits the bundle to `store`.
    pub fn train_and_commit(
        &self,
        dataset: &TrainingDataset,
        store: &BundleStore,
    ) -> Result<TrainingOutcome, PipelineError> {
        let run = self.train(dataset)?;
        let bundle_dir = store.commit(&run.bundle)?;
        let run_id = run.bundle.run_id().to_owned();
        let telemetry = self.telemetry.as_ref();
        log(
            telemetry,
            LogLevel::Info,
            "bundle_committed",
            json!({ "run_id": run_id, "path": bundle_dir.display().to_string() }),
        );
        event(
            telemetry,
            "model.bundle.committed",
            json!({ "run_id": run_id, "accuracy": run.report.accuracy }),
        );
        Ok(TrainingOutcome {
            run_id,
            bundle_dir,
            report: run.report,
        })
    }

    fn observe(&self, report: &EvaluationReport) {
        let telemetry = self.telemetry.as_ref();
        log(
            telemetry,
            LogLevel::Info,
            "training_evaluated",
            json!({ "summary": report.summary(), "accuracy": report.accuracy, "samples": report.samples }),
        );
        event(
            telemetry,
            "model.training.evaluated",
            serde_json::to_value(report).unwrap_or_default(),
        );
        if report.accuracy < self.config.min_accuracy {
            log(
                telemetry,
                LogLevel::Warn,
                "training_below_accuracy_floor",
                json!({ "accuracy": report.accuracy, "min_accuracy": self.config.min_accuracy }),
            );
            event(
                telemetry,
                "model.training.below_accuracy_floor",
                json!({ "accuracy": report.accuracy, "min_accuracy": self.config.min_accuracy }),
            );
        }
    }
}

fn evaluate(
    classifier: &impl Classifier,
    scaled: &Array2<f64>,
    labels: &[usize],
    split: &DatasetSplit,
    class_names: &[String],
) -> EvaluationReport {
    let actual: Vec<usize> = split.test.iter().map(|&row| labels[row]).collect();
    let predicted: Vec<usize> = split
        .test
        .iter()
        .map(|&row| classifier.predict(&scaled.row(row).to_vec()))
        .collect();
    EvaluationReport::from_predictions(&actual, &predicted, class_names)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        classifier::ClassifierConfig,
        dataset::{tests::fixture_path, HistoricalRow},
        error::TrainingDataError,
        forest::RandomForestConfig,
    };
    use shared_event_bus::MemoryEventBus;
    use shared_logging::MemoryLogger;
    use tempfile::tempdir;

    fn fast_config() -> TrainingConfig {
        TrainingConfig {
            classifier: ClassifierConfig::RandomForest(RandomForestConfig {
                n_estimators: 25,
                ..RandomForestConfig::default()
            }),
            ..TrainingConfig::default()
        }
    }

    fn fixture() -> TrainingDataset {
        TrainingDataset::from_csv_path(fixture_path()).unwrap()
    }

    fn with_rows(edit: impl Fn(usize, &mut HistoricalRow)) -> TrainingDataset {
        let mut rows = fixture().rows().to_vec();
        for (index, row) in rows.iter_mut().enumerate() {
            edit(index, row);
        }
        TrainingDataset::from_rows(rows).unwrap()
    }

    #[test]
    fn trains_on_the_fixture() {
        let run = TrainingPipeline::new(fast_config()).train(&fixture()).unwrap();
        assert_eq!(run.features.dim(), (90, 12));
        assert_eq!(run.split.test.len(), 28);
        assert_eq!(run.report.samples, 28);
        assert!(run.report.accuracy > 0.6, "{}", run.report.summary());
        let labels = run.bundle.labels().unwrap();
        assert_eq!(labels.values().to_vec(), vec!["None", "Sleep Apnea", "Insomnia"]);
        assert_eq!(run.bundle.encoders().encode("BMI Category", "Normal").unwrap(), 0);
    }

    #[test]
    fn identical_inputs_train_identically() {
        let pipeline = TrainingPipeline::new(fast_config());
        let first = pipeline.train(&fixture()).unwrap();
        let second = pipeline.train(&fixture()).unwrap();
        assert_eq!(first.split, second.split);
        assert_eq!(first.features, second.features);
        assert_eq!(first.bundle.scaler(), second.bundle.scaler());
        assert_eq!(first.bundle.classifier(), second.bundle.classifier());
        assert_ne!(first.bundle.run_id(), second.bundle.run_id());
    }

    #[test]
    fn constant_column_aborts_training() {
        let dataset = with_rows(|_, row| row.heart_rate = 70.0);
        let err = TrainingPipeline::new(fast_config()).train(&dataset).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TrainingData(TrainingDataError::DegenerateColumn { ref column, index: 8 })
                if column == "Heart Rate"
        ));
    }

    #[test]
    fn bad_row_names_its_line() {
        let dataset = with_rows(|index, row| {
            if index == 4 {
                row.occupation = "Astronaut".into();
            }
        });
        let err = TrainingPipeline::new(fast_config()).train(&dataset).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Row { line: 6, source: SchemaError::UnseenCategory { ref field, .. } }
                if field == "Occupation"
        ));

        let dataset = with_rows(|index, row| {
            if index == 0 {
                row.blood_pressure = "120-80".into();
            }
        });
        assert!(matches!(
            TrainingPipeline::new(fast_config()).train(&dataset),
            Err(PipelineError::Row { line: 2, source: SchemaError::MalformedBloodPressure { .. } })
        ));
    }

    #[test]
    fn reordered_labels_are_refused_before_fitting() {
        let mut config = fast_config();
        config.vocabularies.insert(
            TARGET_FIELD.to_owned(),
            vec!["Insomnia".into(), "None".into(), "Sleep Apnea".into()],
        );
        let err = TrainingPipeline::new(config).train(&fixture()).unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }), "{err:?}");
    }

    #[test]
    fn rare_label_cannot_be_split() {
        let mut rows: Vec<HistoricalRow> = fixture()
            .rows()
            .iter()
            .filter(|row| row.label() != "Insomnia")
            .cloned()
            .collect();
        let mut lone = rows[0].clone();
        lone.sleep_disorder = Some("Insomnia".into());
        rows.push(lone);
        let dataset = TrainingDataset::from_rows(rows).unwrap();
        let err = TrainingPipeline::new(fast_config()).train(&dataset).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TrainingData(TrainingDataError::EmptyPartition { ref label, .. })
                if label == "Insomnia"
        ));
    }

    #[test]
    fn training_partition_scaler_uses_fewer_rows() {
        let config = TrainingConfig {
            scaler_fit: ScalerFit::TrainingPartition,
            ..fast_config()
        };
        let partition = TrainingPipeline::new(config).train(&fixture()).unwrap();
        let all_rows = TrainingPipeline::new(fast_config()).train(&fixture()).unwrap();
        assert_eq!(partition.split, all_rows.split);
        assert_ne!(partition.bundle.scaler().means, all_rows.bundle.scaler().means);
    }

    #[test]
    fn low_accuracy_is_flagged_but_committed() {
        let shuffled = {
            let rows = fixture().rows().to_vec();
            let labels: Vec<Option<String>> =
                rows.iter().map(|row| row.sleep_disorder.clone()).collect();
            let shifted: Vec<HistoricalRow> = rows
                .into_iter()
                .enumerate()
                .map(|(index, mut row)| {
                    row.sleep_disorder = labels[(index * 7 + 3) % labels.len()].clone();
                    row
                })
                .collect();
            TrainingDataset::from_rows(shifted).unwrap()
        };
        let sink = Arc::new(MemoryLogger::default());
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = ModelTelemetry::builder("sleep_model")
            .sink(sink.clone())
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let config = TrainingConfig {
            min_accuracy: 1.0,
            ..fast_config()
        };
        let tmp = tempdir().unwrap();
        let store = BundleStore::new(tmp.path());
        let outcome = TrainingPipeline::new(config)
            .with_telemetry(telemetry)
            .train_and_commit(&shuffled, &store)
            .unwrap();

        assert!(outcome.report.accuracy < 1.0);
        assert_eq!(sink.with_message("training_below_accuracy_floor").len(), 1);
        assert_eq!(bus.of_type("model.training.below_accuracy_floor").len(), 1);
        assert_eq!(bus.of_type("model.bundle.committed").len(), 1);
        assert_eq!(store.latest().unwrap().as_deref(), Some(outcome.run_id.as_str()));
        assert!(ArtifactBundle::load(&outcome.bundle_dir).is_ok());
    }
}
