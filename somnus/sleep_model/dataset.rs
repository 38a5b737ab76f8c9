//! Historical training data as read from the sleep-health CSV export.

use std::{fs::File, io::Read, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{SchemaError, TrainingDataError},
    schema::SleepRecord,
};

/// Canonical label for rows without a diagnosed disorder.
pub const NO_DISORDER: &str = "None";

/// One CSV row. Columns not listed here (such as `Person ID`) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRow {
    /// Gender category.
    #[serde(rename = "Gender")]
    pub gender: String,
    /// Age in years.
    #[serde(rename = "Age")]
    pub age: u32,
    /// Occupation category.
    #[serde(rename = "Occupation")]
    pub occupation: String,
    /// Hours of sleep per day.
    #[serde(rename = "Sleep Duration")]
    pub sleep_duration: f64,
    /// Sleep quality score.
    #[serde(rename = "Quality of Sleep")]
    pub quality_of_sleep: f64,
    /// Minutes of activity per day.
    #[serde(rename = "Physical Activity Level")]
    pub physical_activity_level: f64,
    /// Stress score.
    #[serde(rename = "Stress Level")]
    pub stress_level: f64,
    /// BMI category, possibly a synonym.
    #[serde(rename = "BMI Category")]
    pub bmi_category: String,
    /// Combined `systolic/diastolic` text.
    #[serde(rename = "Blood Pressure")]
    pub blood_pressure: String,
    /// Resting heart rate.
    #[serde(rename = "Heart Rate")]
    pub heart_rate: f64,
    /// Steps per day.
    #[serde(rename = "Daily Steps")]
    pub daily_steps: f64,
    /// Diagnosed disorder; blank when none was recorded.
    #[serde(rename = "Sleep Disorder", default)]
    pub sleep_disorder: Option<String>,
}

impl HistoricalRow {
    /// Converts the row into a typed record, splitting blood pressure and
    /// canonicalizing the BMI category.
    pub fn to_record(&self, bmi: &BmiCanonicalizer) -> Result<SleepRecord, SchemaError> {
        let record = SleepRecord {
            age: self.age,
            gender: self.gender.trim().to_owned(),
            occupation: self.occupation.trim().to_owned(),
            sleep_duration: self.sleep_duration,
            quality_of_sleep: self.quality_of_sleep,
            physical_activity_level: self.physical_activity_level,
            stress_level: self.stress_level,
            bmi_category: bmi.canonicalize(&self.bmi_category),
            heart_rate: self.heart_rate,
            daily_steps: self.daily_steps,
            systolic: 0,
            diastolic: 0,
        }
        .with_blood_pressure(&self.blood_pressure)?;
        record.validate()?;
        Ok(record)
    }

    /// Normalized disorder label.
    #[must_use]
    pub fn label(&self) -> String {
        normalize_label(self.sleep_disorder.as_deref())
    }
}

/// Maps an absent, blank or `none` label to [`NO_DISORDER`]; trims anything else.
#[must_use]
pub fn normalize_label(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        None | Some("") => NO_DISORDER.to_owned(),
        Some(text) if text.eq_ignore_ascii_case(NO_DISORDER) => NO_DISORDER.to_owned(),
        Some(text) => text.to_owned(),
    }
}

/// Collapses alternate BMI spellings onto their canonical category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BmiCanonicalizer {
    synonyms: IndexMap<String, String>,
}

impl Default for BmiCanonicalizer {
    fn default() -> Self {
        Self::new([("Normal Weight", "Normal")])
    }
}

impl BmiCanonicalizer {
    /// Builds a table of `synonym -> canonical` pairs.
    pub fn new<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            synonyms: pairs
                .into_iter()
                .map(|(synonym, canonical)| (synonym.into(), canonical.into()))
                .collect(),
        }
    }

    /// Canonical spelling of `raw` (trimmed; unchanged when not a synonym).
    #[must_use]
    pub fn canonicalize(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.synonyms
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_owned())
    }

    /// Registered synonyms in declaration order.
    pub fn synonyms(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.synonyms
            .iter()
            .map(|(synonym, canonical)| (synonym.as_str(), canonical.as_str()))
    }
}

/// Parsed rows together with their source line numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingDataset {
    rows: Vec<HistoricalRow>,
    lines: Vec<u64>,
}

impl TrainingDataset {
    /// Reads a CSV file with a header row.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, TrainingDataError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| TrainingDataError::Unreadable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Self::from_reader(file)
    }

    /// Reads CSV text with a header row from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TrainingDataError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| csv_error(&err, 1))?
            .clone();

        let mut rows = Vec::new();
        let mut lines = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let fallback_line = index as u64 + 2;
            let record = record.map_err(|err| csv_error(&err, fallback_line))?;
            let line = record.position().map_or(fallback_line, csv::Position::line);
            let row: HistoricalRow = record
                .deserialize(Some(&headers))
                .map_err(|err| csv_error(&err, line))?;
            rows.push(row);
            lines.push(line);
        }
        Self::from_rows_at(rows, lines)
    }

    /// Wraps in-memory rows; line numbers count from 2 as if under a header.
    pub fn from_rows(rows: Vec<HistoricalRow>) -> Result<Self, TrainingDataError> {
        let lines = (0..rows.len()).map(|index| index as u64 + 2).collect();
        Self::from_rows_at(rows, lines)
    }

    fn from_rows_at(rows: Vec<HistoricalRow>, lines: Vec<u64>) -> Result<Self, TrainingDataError> {
        if rows.is_empty() {
            return Err(TrainingDataError::EmptyDataset);
        }
        Ok(Self { rows, lines })
    }

    /// Parsed rows in file order.
    #[must_use]
    pub fn rows(&self) -> &[HistoricalRow] {
        &self.rows
    }

    /// Rows paired with their 1-based source line.
    pub fn numbered_rows(&self) -> impl Iterator<Item = (u64, &HistoricalRow)> + '_ {
        self.lines.iter().copied().zip(&self.rows)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Always false for a constructed dataset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn csv_error(err: &csv::Error, fallback_line: u64) -> TrainingDataError {
    TrainingDataError::Csv {
        line: err.position().map_or(fallback_line, csv::Position::line),
        reason: err.to_string(),
    }
}
