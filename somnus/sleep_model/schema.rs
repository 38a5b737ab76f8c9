use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Name of the target field in training data and vocabularies.
pub const TARGET_FIELD: &str = "Sleep Disorder";

/// How a feature becomes a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Encoded through a category vocabulary.
    Categorical,
    /// Used as-is.
    Numeric,
}

/// The twelve model inputs, named by their training column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Categorical gender.
    #[serde(rename = "Gender")]
    Gender,
    /// Age in years.
    #[serde(rename = "Age")]
    Age,
    /// Categorical occupation.
    #[serde(rename = "Occupation")]
    Occupation,
    /// Hours of sleep per day.
    #[serde(rename = "Sleep Duration")]
    SleepDuration,
    /// Self-reported sleep quality.
    #[serde(rename = "Quality of Sleep")]
    QualityOfSleep,
    /// Minutes of activity per day.
    #[serde(rename = "Physical Activity Level")]
    PhysicalActivityLevel,
    /// Self-reported stress.
    #[serde(rename = "Stress Level")]
    StressLevel,
    /// Categorical BMI bucket.
    #[serde(rename = "BMI Category")]
    BmiCategory,
    /// Resting heart rate.
    #[serde(rename = "Heart Rate")]
    HeartRate,
    /// Steps per day.
    #[serde(rename = "Daily Steps")]
    DailySteps,
    /// Systolic pressure.
    #[serde(rename = "Systolic")]
    Systolic,
    /// Diastolic pressure.
    #[serde(rename = "Diastolic")]
    Diastolic,
}

impl Feature {
    /// Every feature in the standard training order.
    pub const ALL: [Self; 12] = [
        Self::Gender,
        Self::Age,
        Self::Occupation,
        Self::SleepDuration,
        Self::QualityOfSleep,
        Self::PhysicalActivityLevel,
        Self::StressLevel,
        Self::BmiCategory,
        Self::HeartRate,
        Self::DailySteps,
        Self::Systolic,
        Self::Diastolic,
    ];

    /// Column name used in datasets, vocabularies and artifacts.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gender => "Gender",
            Self::Age => "Age",
            Self::Occupation => "Occupation",
            Self::SleepDuration => "Sleep Duration",
            Self::QualityOfSleep => "Quality of Sleep",
            Self::PhysicalActivityLevel => "Physical Activity Level",
            Self::StressLevel => "Stress Level",
            Self::BmiCategory => "BMI Category",
            Self::HeartRate => "Heart Rate",
            Self::DailySteps => "Daily Steps",
            Self::Systolic => "Systolic",
            Self::Diastolic => "Diastolic",
        }
    }

    /// Intrinsic kind of the feature.
    #[must_use]
    pub const fn kind(self) -> FeatureKind {
        match self {
            Self::Gender | Self::Occupation | Self::BmiCategory => FeatureKind::Categorical,
            _ => FeatureKind::Numeric,
        }
    }

    /// Looks a feature up by column name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|feature| feature.name() == name)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One position of the feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    /// Feature placed at this position.
    pub feature: Feature,
    /// Declared kind; must agree with [`Feature::kind`].
    pub kind: FeatureKind,
}

/// Ordered list of columns a record is vectorized into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FeatureColumn>", into = "Vec<FeatureColumn>")]
pub struct FeatureSchema {
    columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    /// Validates and wraps an explicit column order.
    pub fn new(columns: Vec<FeatureColumn>) -> Result<Self, SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::InvalidSchema {
                reason: "no columns".into(),
            });
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.feature) {
                return Err(SchemaError::InvalidSchema {
                    reason: format!("`{}` declared twice", column.feature),
                });
            }
            if column.kind != column.feature.kind() {
                return Err(SchemaError::InvalidSchema {
                    reason: format!("`{}` declared as {:?}", column.feature, column.kind),
                });
            }
        }
        Ok(Self { columns })
    }

    /// Builds a schema from features, taking each feature's intrinsic kind.
    pub fn from_features(features: &[Feature]) -> Result<Self, SchemaError> {
        Self::new(
            features
                .iter()
                .map(|&feature| FeatureColumn {
                    feature,
                    kind: feature.kind(),
                })
                .collect(),
        )
    }

    /// The historical twelve-column order.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            columns: Feature::ALL
                .into_iter()
                .map(|feature| FeatureColumn {
                    feature,
                    kind: feature.kind(),
                })
                .collect(),
        }
    }

    /// Columns in vector order.
    #[must_use]
    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    /// Number of positions in the vector.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always false for a validated schema.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names in vector order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| column.feature.name().to_owned())
            .collect()
    }

    /// Names of the categorical columns in vector order.
    pub fn categorical_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .filter(|column| column.kind == FeatureKind::Categorical)
            .map(|column| column.feature.name())
    }
}

impl TryFrom<Vec<FeatureColumn>> for FeatureSchema {
    type Error = SchemaError;

    fn try_from(columns: Vec<FeatureColumn>) -> Result<Self, Self::Error> {
        Self::new(columns)
    }
}

impl From<FeatureSchema> for Vec<FeatureColumn> {
    fn from(schema: FeatureSchema) -> Self {
        schema.columns
    }
}

/// Blood pressure split into its two readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodPressure {
    /// Systolic pressure.
    pub systolic: u32,
    /// Diastolic pressure.
    pub diastolic: u32,
}

impl FromStr for BloodPressure {
    type Err = SchemaError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || SchemaError::MalformedBloodPressure {
            input: raw.to_owned(),
        };
        let mut parts = raw.split('/');
        let (Some(systolic), Some(diastolic), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        Ok(Self {
            systolic: systolic.trim().parse().map_err(|_| malformed())?,
            diastolic: diastolic.trim().parse().map_err(|_| malformed())?,
        })
    }
}

impl fmt::Display for BloodPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.systolic, self.diastolic)
    }
}

/// Typed input record for a single prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SleepRecord {
    /// Age in years.
    pub age: u32,
    /// Gender category.
    pub gender: String,
    /// Occupation category.
    pub occupation: String,
    /// Hours of sleep per day.
    pub sleep_duration: f64,
    /// Sleep quality score.
    pub quality_of_sleep: f64,
    /// Minutes of activity per day.
    pub physical_activity_level: f64,
    /// Stress score.
    pub stress_level: f64,
    /// BMI category.
    pub bmi_category: String,
    /// Resting heart rate.
    pub heart_rate: f64,
    /// Steps per day.
    pub daily_steps: f64,
    /// Systolic pressure.
    pub systolic: u32,
    /// Diastolic pressure.
    pub diastolic: u32,
}

/// Value a record holds for one feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue<'a> {
    /// Category text awaiting encoding.
    Category(&'a str),
    /// Raw number.
    Number(f64),
}

impl SleepRecord {
    /// Sets both pressure readings from `systolic/diastolic` text.
    pub fn with_blood_pressure(mut self, text: &str) -> Result<Self, SchemaError> {
        let pressure: BloodPressure = text.parse()?;
        self.systolic = pressure.systolic;
        self.diastolic = pressure.diastolic;
        Ok(self)
    }

    /// Pressure readings as a pair.
    #[must_use]
    pub const fn blood_pressure(&self) -> BloodPressure {
        BloodPressure {
            systolic: self.systolic,
            diastolic: self.diastolic,
        }
    }

    /// Looks up the value for a feature.
    #[must_use]
    pub fn value(&self, feature: Feature) -> FeatureValue<'_> {
        match feature {
            Feature::Gender => FeatureValue::Category(&self.gender),
            Feature::Occupation => FeatureValue::Category(&self.occupation),
            Feature::BmiCategory => FeatureValue::Category(&self.bmi_category),
            Feature::Age => FeatureValue::Number(f64::from(self.age)),
            Feature::SleepDuration => FeatureValue::Number(self.sleep_duration),
            Feature::QualityOfSleep => FeatureValue::Number(self.quality_of_sleep),
            Feature::PhysicalActivityLevel => FeatureValue::Number(self.physical_activity_level),
            Feature::StressLevel => FeatureValue::Number(self.stress_level),
            Feature::HeartRate => FeatureValue::Number(self.heart_rate),
            Feature::DailySteps => FeatureValue::Number(self.daily_steps),
            Feature::Systolic => FeatureValue::Number(f64::from(self.systolic)),
            Feature::Diastolic => FeatureValue::Number(f64::from(self.diastolic)),
        }
    }

    /// Rejects NaN and infinite numeric fields.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for feature in Feature::ALL {
            if let FeatureValue::Number(value) = self.value(feature) {
                if !value.is_finite() {
                    return Err(SchemaError::NonFiniteValue {
                        field: feature.name().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }
}
