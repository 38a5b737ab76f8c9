use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    classifier::ClassifierConfig,
    dataset::{BmiCanonicalizer, NO_DISORDER},
    schema::{Feature, FeatureSchema, TARGET_FIELD},
};

/// Fixed label order; code 0 is always the no-disorder class.
pub const LABEL_ORDER: [&str; 3] = [NO_DISORDER, "Sleep Apnea", "Insomnia"];

/// When the scaler statistics are computed relative to the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerFit {
    /// Fit on every row before splitting.
    #[default]
    AllRows,
    /// Fit on the training partition only.
    TrainingPartition,
}

/// Training run settings, loadable from TOML. Every key has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Seed for the split and the classifier.
    pub seed: u64,
    /// Held-out share per label class.
    pub test_size: f64,
    /// Scaler fitting mode.
    pub scaler_fit: ScalerFit,
    /// Accuracy below which the run is flagged (never aborted).
    pub min_accuracy: f64,
    /// Feature vector order.
    pub features: Vec<Feature>,
    /// Algorithm and hyperparameters.
    pub classifier: ClassifierConfig,
    /// Declared category order per field, target label included.
    pub vocabularies: IndexMap<String, Vec<String>>,
    /// BMI synonyms collapsed before encoding.
    pub bmi_synonyms: BmiCanonicalizer,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let vocabularies = IndexMap::from([
            ("Gender".to_owned(), strings(&["Female", "Male"])),
            (
                "BMI Category".to_owned(),
                strings(&["Normal", "Overweight", "Obese"]),
            ),
            (
                "Occupation".to_owned(),
                strings(&[
                    "Software Engineer",
                    "Doctor",
                    "Sales Representative",
                    "Teacher",
                    "Nurse",
                    "Engineer",
                    "Accountant",
                    "Scientist",
                    "Lawyer",
                    "Salesperson",
                    "Manager",
                ]),
            ),
            (TARGET_FIELD.to_owned(), strings(&LABEL_ORDER)),
        ]);
        Self {
            seed: 42,
            test_size: 0.3,
            scaler_fit: ScalerFit::default(),
            min_accuracy: 0.7,
            features: Feature::ALL.to_vec(),
            classifier: ClassifierConfig::default(),
            vocabularies,
            bmi_synonyms: BmiCanonicalizer::default(),
        }
    }
}

impl TrainingConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading training config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges and that the schema can be built.
    pub fn validate(&self) -> Result<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            bail!("test_size {} must lie strictly between 0 and 1", self.test_size);
        }
        if !(0.0..=1.0).contains(&self.min_accuracy) {
            bail!("min_accuracy {} must lie within [0, 1]", self.min_accuracy);
        }
        match self.vocabularies.get(TARGET_FIELD) {
            None => bail!("vocabularies must declare the `{TARGET_FIELD}` labels"),
            Some(labels) if labels.iter().map(String::as_str).ne(LABEL_ORDER) => {
                bail!("`{TARGET_FIELD}` labels must be {LABEL_ORDER:?} in that order, got {labels:?}")
            }
            Some(_) => {}
        }
        if let Some(bmi) = self.vocabularies.get(Feature::BmiCategory.name()) {
            if let Some((synonym, canonical)) = self
                .bmi_synonyms
                .synonyms()
                .find(|(synonym, _)| bmi.iter().any(|value| value == synonym))
            {
                bail!("`BMI Category` declares `{synonym}`, which is a synonym of `{canonical}`");
            }
        }
        self.schema().context("invalid feature list")?;
        Ok(())
    }

    /// Feature schema described by `features`.
    pub fn schema(&self) -> Result<FeatureSchema, crate::error::SchemaError> {
        FeatureSchema::from_features(&self.features)
    }

    /// Renders the config as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("rendering training config")
    }
}
