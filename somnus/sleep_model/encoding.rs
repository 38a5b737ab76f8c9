//! Category vocabularies: stable string to integer codes per field.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{error::SchemaError, schema::FeatureSchema};

/// Ordered, immutable category list for one field.
///
/// Codes are positions in declaration order and are never renumbered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryVocabulary {
    field: String,
    values: Vec<String>,
    #[serde(skip)]
    codes: HashMap<String, usize>,
}

impl<'de> Deserialize<'de> for CategoryVocabulary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Declared {
            field: String,
            values: Vec<String>,
        }

        let declared = Declared::deserialize(deserializer)?;
        Self::new(declared.field, declared.values).map_err(serde::de::Error::custom)
    }
}

impl CategoryVocabulary {
    /// Builds a vocabulary, rejecting empty and duplicate declarations.
    pub fn new<I, S>(field: impl Into<String>, values: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let field = field.into();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(SchemaError::EmptyVocabulary { field });
        }
        let mut codes = HashMap::with_capacity(values.len());
        for (code, value) in values.iter().enumerate() {
            if codes.insert(value.clone(), code).is_some() {
                return Err(SchemaError::DuplicateCategory {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(Self {
            field,
            values,
            codes,
        })
    }

    /// Field the vocabulary belongs to.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Values in code order.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Number of codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false for a constructed vocabulary.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Code for `value`.
    pub fn encode(&self, value: &str) -> Result<usize, SchemaError> {
        self.codes
            .get(value)
            .copied()
            .ok_or_else(|| SchemaError::UnseenCategory {
                field: self.field.clone(),
                value: value.to_owned(),
            })
    }

    /// Value for `code`.
    pub fn decode(&self, code: usize) -> Result<&str, SchemaError> {
        self.values
            .get(code)
            .map(String::as_str)
            .ok_or_else(|| SchemaError::InvalidCode {
                field: self.field.clone(),
                code,
            })
    }
}

/// Vocabularies for the schema's categorical fields plus the target label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSet {
    admitted: Vec<String>,
    target: String,
    vocabularies: IndexMap<String, CategoryVocabulary>,
}

impl EncoderSet {
    /// Empty set admitting the schema's categorical fields and `target`.
    #[must_use]
    pub fn for_schema(schema: &FeatureSchema, target: impl Into<String>) -> Self {
        let target = target.into();
        let mut admitted: Vec<String> = schema.categorical_fields().map(str::to_owned).collect();
        admitted.push(target.clone());
        Self {
            admitted,
            target,
            vocabularies: IndexMap::new(),
        }
    }

    /// Registers the vocabulary for `field` in declaration order. A field is fitted once.
    pub fn fit<I, S>(&mut self, field: &str, ordered_values: I) -> Result<(), SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.check_admitted(field)?;
        if self.vocabularies.contains_key(field) {
            return Err(SchemaError::AlreadyFitted {
                field: field.to_owned(),
            });
        }
        let vocabulary = CategoryVocabulary::new(field, ordered_values)?;
        self.vocabularies.insert(field.to_owned(), vocabulary);
        Ok(())
    }

    /// Code for `value` in `field`.
    pub fn encode(&self, field: &str, value: &str) -> Result<usize, SchemaError> {
        self.vocabulary(field)?.encode(value)
    }

    /// Value for `code` in `field`.
    pub fn decode(&self, field: &str, code: usize) -> Result<&str, SchemaError> {
        self.vocabulary(field)?.decode(code)
    }

    /// Fitted vocabulary for `field`.
    pub fn vocabulary(&self, field: &str) -> Result<&CategoryVocabulary, SchemaError> {
        self.check_admitted(field)?;
        self.vocabularies
            .get(field)
            .ok_or_else(|| SchemaError::UnfittedField {
                field: field.to_owned(),
            })
    }

    /// Target field name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Vocabulary of the target label.
    pub fn labels(&self) -> Result<&CategoryVocabulary, SchemaError> {
        self.vocabulary(&self.target)
    }

    /// Feature vocabularies (target excluded) in fit order.
    pub fn feature_vocabularies(&self) -> impl Iterator<Item = &CategoryVocabulary> + '_ {
        self.vocabularies
            .values()
            .filter(|vocabulary| vocabulary.field() != self.target)
    }

    /// True once every admitted field has a vocabulary.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Admitted fields that still lack a vocabulary.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&str> {
        self.admitted
            .iter()
            .filter(|field| !self.vocabularies.contains_key(field.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Rebuilds a set from persisted feature and label vocabularies.
    pub fn from_parts(
        schema: &FeatureSchema,
        features: Vec<CategoryVocabulary>,
        labels: CategoryVocabulary,
    ) -> Result<Self, SchemaError> {
        let mut set = Self::for_schema(schema, labels.field().to_owned());
        for vocabulary in features.into_iter().chain(std::iter::once(labels)) {
            let field = vocabulary.field().to_owned();
            set.check_admitted(&field)?;
            set.vocabularies.insert(field, vocabulary);
        }
        Ok(set)
    }

    fn check_admitted(&self, field: &str) -> Result<(), SchemaError> {
        if self.admitted.iter().any(|admitted| admitted == field) {
            Ok(())
        } else {
            Err(SchemaError::UnknownField {
                field: field.to_owned(),
            })
        }
    }
}
