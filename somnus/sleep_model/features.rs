use ndarray::Array2;

use crate::{
    encoding::EncoderSet,
    error::SchemaError,
    schema::{FeatureSchema, FeatureValue, SleepRecord},
};

/// Turns typed records into numeric vectors in schema order.
#[derive(Debug, Clone, Copy)]
pub struct FeatureVectorBuilder<'a> {
    schema: &'a FeatureSchema,
    encoders: &'a EncoderSet,
}

impl<'a> FeatureVectorBuilder<'a> {
    /// Binds a schema to the encoders fitted for it.
    #[must_use]
    pub const fn new(schema: &'a FeatureSchema, encoders: &'a EncoderSet) -> Self {
        Self { schema, encoders }
    }

    /// Vector with one value per schema column, in column order.
    pub fn build(&self, record: &SleepRecord) -> Result<Vec<f64>, SchemaError> {
        record.validate()?;
        self.schema
            .columns()
            .iter()
            .map(|column| match record.value(column.feature) {
                FeatureValue::Number(value) => Ok(value),
                FeatureValue::Category(value) => self
                    .encoders
                    .encode(column.feature.name(), value)
                    .map(|code| code as f64),
            })
            .collect()
    }

    /// Stacks the vectors of `records` into a row-major matrix.
    pub fn build_matrix<'r, I>(&self, records: I) -> Result<Array2<f64>, SchemaError>
    where
        I: IntoIterator<Item = &'r SleepRecord>,
    {
        let width = self.schema.len();
        let mut values = Vec::new();
        let mut rows = 0;
        for record in records {
            values.extend(self.build(record)?);
            rows += 1;
        }
        let produced = values.len();
        Array2::from_shape_vec((rows, width), values).map_err(|_| SchemaError::DimensionMismatch {
            expected: rows * width,
            actual: produced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{tests::engineer, Feature, TARGET_FIELD};

    fn encoders(schema: &FeatureSchema) -> EncoderSet {
        let mut set = EncoderSet::for_schema(schema, TARGET_FIELD);
        set.fit("Gender", ["Female", "Male"]).unwrap();
        set.fit("BMI Category", ["Normal", "Overweight", "Obese"]).unwrap();
        set.fit("Occupation", ["Doctor", "Engineer"]).unwrap();
        set.fit(TARGET_FIELD, ["None", "Sleep Apnea", "Insomnia"]).unwrap();
        set
    }

    #[test]
    fn builds_in_schema_order() {
        let schema = FeatureSchema::standard();
        let encoders = encoders(&schema);
        let vector = FeatureVectorBuilder::new(&schema, &encoders)
            .build(&engineer())
            .unwrap();
        assert_eq!(
            vector,
            vec![1.0, 35.0, 1.0, 7.5, 8.0, 60.0, 5.0, 0.0, 70.0, 8000.0, 120.0, 80.0]
        );
    }

    #[test]
    fn input_field_order_does_not_matter() {
        let schema = FeatureSchema::standard();
        let encoders = encoders(&schema);
        let shuffled = r#"{
            "diastolic": 80, "systolic": 120, "daily_steps": 8000.0, "heart_rate": 70.0,
            "bmi_category": "Normal", "stress_level": 5.0, "physical_activity_level": 60.0,
            "quality_of_sleep": 8.0, "sleep_duration": 7.5, "occupation": "Engineer",
            "gender": "Male", "age": 35
        }"#;
        let record: SleepRecord = serde_json::from_str(shuffled).unwrap();
        let builder = FeatureVectorBuilder::new(&schema, &encoders);
        assert_eq!(builder.build(&record).unwrap(), builder.build(&engineer()).unwrap());
    }

    #[test]
    fn custom_schema_controls_length_and_order() {
        let schema =
            FeatureSchema::from_features(&[Feature::Diastolic, Feature::Gender, Feature::Age])
                .unwrap();
        let mut encoders = EncoderSet::for_schema(&schema, TARGET_FIELD);
        encoders.fit("Gender", ["Female", "Male"]).unwrap();
        assert!(encoders.fit("Occupation", ["Engineer"]).is_err());
        let vector = FeatureVectorBuilder::new(&schema, &encoders)
            .build(&engineer())
            .unwrap();
        assert_eq!(vector, vec![80.0, 1.0, 35.0]);
    }

    #[test]
    fn unseen_category_fails_the_build() {
        let schema = FeatureSchema::standard();
        let encoders = encoders(&schema);
        let mut record = engineer();
        record.occupation = "Astronaut".into();
        let err = FeatureVectorBuilder::new(&schema, &encoders)
            .build(&record)
            .unwrap_err();
        assert_eq!(err.field(), Some("Occupation"));
    }

    #[test]
    fn matrix_stacks_rows() {
        let schema = FeatureSchema::standard();
        let encoders = encoders(&schema);
        let mut second = engineer();
        second.age = 50;
        let matrix = FeatureVectorBuilder::new(&schema, &encoders)
            .build_matrix([&engineer(), &second])
            .unwrap();
        assert_eq!(matrix.dim(), (2, 12));
        assert!((matrix[[1, 1]] - 50.0).abs() < f64::EPSILON);
    }
}
