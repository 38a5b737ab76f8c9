use std::path::PathBuf;

use thiserror::Error;

/// Record or encoding contract violations. Never defaulted away.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    /// Field is not part of the feature schema (or the target field).
    #[error("field `{field}` is not part of the feature schema")]
    UnknownField {
        /// Offending field name.
        field: String,
    },
    /// Field is known but no vocabulary has been fitted for it.
    #[error("field `{field}` has no fitted vocabulary")]
    UnfittedField {
        /// Offending field name.
        field: String,
    },
    /// Value outside the fitted vocabulary.
    #[error("unseen category `{value}` for field `{field}`")]
    UnseenCategory {
        /// Field being encoded.
        field: String,
        /// Value that is not in the vocabulary.
        value: String,
    },
    /// A vocabulary is already registered for the field; codes never renumber.
    #[error("field `{field}` already has a fitted vocabulary")]
    AlreadyFitted {
        /// Offending field name.
        field: String,
    },
    /// Code outside the vocabulary range.
    #[error("code {code} is out of range for field `{field}`")]
    InvalidCode {
        /// Field being decoded.
        field: String,
        /// Offending code.
        code: usize,
    },
    /// A vocabulary declared the same value twice.
    #[error("category `{value}` declared twice for field `{field}`")]
    DuplicateCategory {
        /// Field whose vocabulary is invalid.
        field: String,
        /// Repeated value.
        value: String,
    },
    /// A vocabulary declared no values.
    #[error("vocabulary for field `{field}` is empty")]
    EmptyVocabulary {
        /// Field whose vocabulary is invalid.
        field: String,
    },
    /// Blood pressure text is not `systolic/diastolic`.
    #[error("malformed blood pressure `{input}`, expected `systolic/diastolic`")]
    MalformedBloodPressure {
        /// Raw text supplied by the caller.
        input: String,
    },
    /// Vector length differs from the fitted parameter length.
    #[error("feature vector has {actual} values, expected {expected}")]
    DimensionMismatch {
        /// Length the scaler was fitted on.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },
    /// Numeric field is NaN or infinite.
    #[error("field `{field}` must be a finite number")]
    NonFiniteValue {
        /// Offending field name.
        field: String,
    },
    /// Schema declares a feature twice or with the wrong kind.
    #[error("invalid feature schema: {reason}")]
    InvalidSchema {
        /// Description of the problem.
        reason: String,
    },
}

impl SchemaError {
    /// Name of the field the error refers to, when there is one.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::UnknownField { field }
            | Self::UnfittedField { field }
            | Self::AlreadyFitted { field }
            | Self::UnseenCategory { field, .. }
            | Self::InvalidCode { field, .. }
            | Self::DuplicateCategory { field, .. }
            | Self::EmptyVocabulary { field }
            | Self::NonFiniteValue { field } => Some(field),
            Self::MalformedBloodPressure { .. } => Some("Blood Pressure"),
            Self::DimensionMismatch { .. } | Self::InvalidSchema { .. } => None,
        }
    }
}

/// Missing or damaged bundle components. Fatal at load time.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A required artifact file does not exist.
    #[error("artifact `{artifact}` missing at {}", path.display())]
    Missing {
        /// Artifact name.
        artifact: String,
        /// Expected location.
        path: PathBuf,
    },
    /// An artifact exists but failed integrity or consistency checks.
    #[error("artifact `{artifact}` is corrupt: {reason}")]
    Corrupt {
        /// Artifact name.
        artifact: String,
        /// Description of the failure.
        reason: String,
    },
    /// Filesystem failure while reading or committing a bundle.
    #[error("bundle io failure at {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    pub(crate) fn corrupt(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Training input problems. Abort the run before anything is written.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrainingDataError {
    /// The dataset holds no rows.
    #[error("training dataset is empty")]
    EmptyDataset,
    /// A feature column has zero variance.
    #[error("feature column `{column}` (position {index}) has zero variance")]
    DegenerateColumn {
        /// Column name.
        column: String,
        /// Column position in the feature schema.
        index: usize,
    },
    /// A label class would be missing from one partition.
    #[error("label `{label}` would leave the {partition} partition empty ({rows} rows)")]
    EmptyPartition {
        /// Label class name.
        label: String,
        /// `training` or `held-out`.
        partition: String,
        /// Rows of that class in the dataset.
        rows: usize,
    },
    /// Split proportion outside (0, 1).
    #[error("test size {test_size} must lie strictly between 0 and 1")]
    InvalidSplit {
        /// Configured proportion.
        test_size: f64,
    },
    /// The dataset file could not be opened.
    #[error("cannot read dataset {}: {reason}", path.display())]
    Unreadable {
        /// Dataset location.
        path: PathBuf,
        /// Underlying io message.
        reason: String,
    },
    /// A CSV line could not be parsed.
    #[error("csv line {line}: {reason}")]
    Csv {
        /// 1-based line number, header included.
        line: u64,
        /// Parser message.
        reason: String,
    },
    /// Classifier fitting rejected its inputs.
    #[error("classifier fit failed: {reason}")]
    Classifier {
        /// Description of the failure.
        reason: String,
    },
}

/// Failure of a training run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input data problems.
    #[error(transparent)]
    TrainingData(#[from] TrainingDataError),
    /// Vocabulary or schema misconfiguration.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A specific training row violated the record contract.
    #[error("training row at line {line}: {source}")]
    Row {
        /// 1-based data line (header is line 1).
        line: u64,
        /// Underlying violation.
        #[source]
        source: SchemaError,
    },
    /// The training config failed validation.
    #[error("invalid training config: {reason}")]
    Config {
        /// Validation message.
        reason: String,
    },
    /// Persisting the bundle failed; nothing was committed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Failure of a single prediction. No partial result accompanies it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PredictionError {
    /// The record violated the schema contract.
    #[error("prediction rejected for field `{field}`: {source}")]
    InvalidField {
        /// Offending field, or `<vector>` for dimension problems.
        field: String,
        /// Underlying violation.
        #[source]
        source: SchemaError,
    },
}

impl From<SchemaError> for PredictionError {
    fn from(source: SchemaError) -> Self {
        let field = source.field().unwrap_or("<vector>").to_owned();
        Self::InvalidField { field, source }
    }
}

impl PredictionError {
    /// The schema violation behind the failure.
    #[must_use]
    pub const fn schema_error(&self) -> &SchemaError {
        match self {
            Self::InvalidField { source, .. } => source,
        }
    }
}
