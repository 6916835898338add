//! Feature codec: raw rows to a fixed-width numeric matrix with frozen categorical encodings.

/// Categorical vocabularies.
pub mod encoder;
/// Feature schema declarations.
pub mod schema;
/// Date and number parsing.
pub mod temporal;

use chrono::NaiveDate;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{RawRecord, RecordBatch},
    error::{ForecastError, ForecastResult},
};
use encoder::{CategoryVocabulary, EncoderState};
use schema::{FeatureSchema, FeatureSource};

/// Numeric feature matrix with its column header.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    /// Column header in matrix order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Read-only view of the values, one row per record.
    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// One row.
    #[must_use]
    pub fn row(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(idx)
    }

    /// Row count.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    /// Column count.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// Rows at `indices`, in that order.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), indices),
        }
    }
}

/// Schema plus the encoder state frozen at fit time.
///
/// A codec only comes out of [`FeatureCodec::fit_transform`] or [`FeatureCodec::from_parts`];
/// there is no way to re-fit one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCodec {
    schema: FeatureSchema,
    state: EncoderState,
}

impl FeatureCodec {
    /// Fits vocabularies on the batch, then encodes it and extracts the target column.
    pub fn fit_transform(
        schema: FeatureSchema,
        batch: &RecordBatch,
        target_column: &str,
    ) -> ForecastResult<(Self, FeatureMatrix, Vec<f64>)> {
        schema.validate()?;
        check_columns(&schema, batch)?;
        let mut state = EncoderState::default();
        for column in schema.categorical() {
            let observed = batch
                .iter()
                .map(|row| row.get(column).unwrap_or_default());
            state.insert(column, CategoryVocabulary::fit(observed));
        }
        let codec = Self { schema, state };
        let matrix = codec.transform(batch)?;
        let target = Self::extract_target(batch, target_column)?;
        Ok((codec, matrix, target))
    }

    /// Reassembles a codec from persisted parts.
    pub fn from_parts(schema: FeatureSchema, state: EncoderState) -> ForecastResult<Self> {
        schema.validate()?;
        for column in schema.categorical() {
            if state.vocabulary(column).is_none() {
                return Err(ForecastError::InvalidSchema {
                    reason: format!("no fitted vocabulary for column `{column}`"),
                });
            }
        }
        Ok(Self { schema, state })
    }

    /// Encodes a batch with the frozen state.
    pub fn transform(&self, batch: &RecordBatch) -> ForecastResult<FeatureMatrix> {
        check_columns(&self.schema, batch)?;
        let features = self.schema.features();
        let mut values = Array2::<f64>::zeros((batch.len(), features.len()));
        for (row_idx, (record, mut out)) in batch
            .iter()
            .zip(values.axis_iter_mut(Axis(0)))
            .enumerate()
        {
            let date = self.row_date(row_idx, record)?;
            for (col_idx, feature) in features.iter().enumerate() {
                out[col_idx] = match feature {
                    FeatureSource::Temporal(field) => date.map_or(0.0, |date| field.extract(date)),
                    FeatureSource::Categorical(column) => {
                        let raw = cell(row_idx, record, column)?;
                        self.state
                            .encode(row_idx, column, raw, self.schema.unseen_policy())?
                            as f64
                    }
                    FeatureSource::Numeric(column) => number(row_idx, record, column)?,
                };
            }
        }
        Ok(FeatureMatrix {
            columns: self.schema.feature_names(),
            values,
        })
    }

    /// Parses the target column of every row.
    pub fn extract_target(batch: &RecordBatch, target_column: &str) -> ForecastResult<Vec<f64>> {
        batch
            .iter()
            .enumerate()
            .map(|(row_idx, record)| number(row_idx, record, target_column))
            .collect()
    }

    /// Parsed date of every row, `None` when the schema has no date column.
    pub fn as_of_dates(&self, batch: &RecordBatch) -> ForecastResult<Vec<Option<NaiveDate>>> {
        batch
            .iter()
            .enumerate()
            .map(|(row_idx, record)| self.row_date(row_idx, record))
            .collect()
    }

    /// Identifier of every row: the identifier column's value, or `row-<n>`.
    #[must_use]
    pub fn identifiers(&self, batch: &RecordBatch) -> Vec<String> {
        batch
            .iter()
            .enumerate()
            .map(|(row_idx, record)| {
                self.schema
                    .identifier_column()
                    .and_then(|column| record.get(column))
                    .map_or_else(|| format!("row-{row_idx}"), str::to_string)
            })
            .collect()
    }

    /// Feature schema.
    #[must_use]
    pub const fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Frozen encoder state.
    #[must_use]
    pub const fn encoder_state(&self) -> &EncoderState {
        &self.state
    }

    fn row_date(&self, row_idx: usize, record: &RawRecord) -> ForecastResult<Option<NaiveDate>> {
        let Some(date_column) = self.schema.date_column() else {
            return Ok(None);
        };
        let raw = cell(row_idx, record, &date_column.name)?;
        temporal::parse_date(raw, &date_column.formats)
            .map(Some)
            .ok_or_else(|| ForecastError::MalformedDate {
                row: row_idx,
                column: date_column.name.clone(),
                value: raw.to_string(),
            })
    }
}

fn check_columns(schema: &FeatureSchema, batch: &RecordBatch) -> ForecastResult<()> {
    let required = schema.required_columns();
    for (row_idx, record) in batch.iter().enumerate() {
        if let Some(column) = required.iter().find(|column| record.get(column).is_none()) {
            return Err(ForecastError::MissingColumn {
                row: row_idx,
                column: (*column).to_string(),
            });
        }
    }
    Ok(())
}

fn cell<'a>(row_idx: usize, record: &'a RawRecord, column: &str) -> ForecastResult<&'a str> {
    record
        .get(column)
        .ok_or_else(|| ForecastError::MissingColumn {
            row: row_idx,
            column: column.to_string(),
        })
}

fn number(row_idx: usize, record: &RawRecord, column: &str) -> ForecastResult<f64> {
    let raw = cell(row_idx, record, column)?;
    temporal::parse_number(raw).ok_or_else(|| ForecastError::MalformedNumber {
        row: row_idx,
        column: column.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::schema::{synthetic_schema, TemporalField, UnseenCategoryPolicy};
    use super::*;
    use crate::dataset::SYNTHETIC_TARGET;

    #[test]
    fn fit_transform_orders_columns_by_schema() {
        let batch = RecordBatch::synthetic(12, 3);
        let (codec, matrix, target) =
            FeatureCodec::fit_transform(synthetic_schema(), &batch, SYNTHETIC_TARGET).unwrap();
        assert_eq!(
            matrix.columns(),
            [
                "year",
                "month",
                "day",
                "day_of_week",
                "quarter",
                "segment_encoded",
                "price",
                "promo"
            ]
        );
        assert_eq!(matrix.n_rows(), 12);
        assert_eq!(target.len(), 12);
        // 2023-01-02 is a Monday in Q1; "alpha" sorts first.
        let first = matrix.row(0);
        assert_eq!(first[0], 2023.0);
        assert_eq!(first[3], 0.0);
        assert_eq!(first[4], 1.0);
        assert_eq!(first[5], 0.0);
        assert_eq!(codec.encoder_state().vocabulary("segment").unwrap().len(), 5);
    }

    #[test]
    fn transform_reuses_frozen_vocabulary() {
        let batch = RecordBatch::synthetic(20, 3);
        let (codec, fitted, _) =
            FeatureCodec::fit_transform(synthetic_schema(), &batch, SYNTHETIC_TARGET).unwrap();
        // A batch holding only "gamma" rows must keep gamma's training code.
        let gamma_rows = batch.select(&[4, 9, 14]);
        let matrix = codec.transform(&gamma_rows).unwrap();
        for idx in 0..3 {
            assert_eq!(matrix.row(idx)[5], 4.0);
        }
        assert_eq!(codec.transform(&batch).unwrap(), fitted);
    }

    #[test]
    fn transform_rejects_unseen_category() {
        let batch = RecordBatch::synthetic(10, 3);
        let (codec, _, _) =
            FeatureCodec::fit_transform(synthetic_schema(), &batch, SYNTHETIC_TARGET).unwrap();
        let mut novel = batch.head(2);
        let mut row = novel.rows()[1].clone();
        row.insert("segment", "omega");
        novel.push(row);
        let err = codec.transform(&novel).unwrap_err();
        assert!(matches!(err, ForecastError::UnseenCategory { row: 2, .. }));
    }

    #[test]
    fn reserved_code_policy_maps_unseen_values() {
        let schema = FeatureSchema::builder()
            .unseen_policy(UnseenCategoryPolicy::ReservedCode)
            .categorical(&["segment"])
            .numeric(&["price"])
            .build();
        let batch = RecordBatch::synthetic(10, 3);
        let (codec, _, _) = FeatureCodec::fit_transform(schema, &batch, SYNTHETIC_TARGET).unwrap();
        let novel = RecordBatch::new(vec![RawRecord::new()
            .with("segment", "omega")
            .with("price", "10")]);
        let matrix = codec.transform(&novel).unwrap();
        assert_eq!(matrix.row(0)[0], 5.0);
    }

    #[test]
    fn reports_data_quality_context() {
        let batch = RecordBatch::synthetic(5, 3);
        let (codec, _, _) =
            FeatureCodec::fit_transform(synthetic_schema(), &batch, SYNTHETIC_TARGET).unwrap();

        let mut bad_date = batch.head(3);
        let mut row = bad_date.rows()[0].clone();
        row.insert("date", "31/31/2023");
        bad_date.push(row);
        assert!(matches!(
            codec.transform(&bad_date),
            Err(ForecastError::MalformedDate { row: 3, .. })
        ));

        let mut missing = batch.head(1);
        let mut row = missing.rows()[0].clone();
        row.remove("price");
        missing.push(row);
        assert!(matches!(
            codec.transform(&missing),
            Err(ForecastError::MissingColumn { row: 1, ref column }) if column == "price"
        ));

        let mut bad_target = batch.head(1);
        let mut row = bad_target.rows()[0].clone();
        row.insert(SYNTHETIC_TARGET, "lots");
        bad_target.push(row);
        assert!(matches!(
            FeatureCodec::extract_target(&bad_target, SYNTHETIC_TARGET),
            Err(ForecastError::MalformedNumber { row: 1, .. })
        ));
    }

    #[test]
    fn identifiers_and_dates_follow_schema() {
        let batch = RecordBatch::synthetic(3, 3);
        let (codec, _, _) =
            FeatureCodec::fit_transform(synthetic_schema(), &batch, SYNTHETIC_TARGET).unwrap();
        assert_eq!(codec.identifiers(&batch), vec!["alpha", "beta", "delta"]);
        let dates = codec.as_of_dates(&batch).unwrap();
        assert_eq!(dates[2], NaiveDate::from_ymd_opt(2023, 1, 4));

        let anonymous = FeatureSchema::builder()
            .date_column("date", &["%Y-%m-%d"])
            .temporal(&[TemporalField::Month])
            .build();
        let (codec, _, _) =
            FeatureCodec::fit_transform(anonymous, &batch, SYNTHETIC_TARGET).unwrap();
        assert_eq!(codec.identifiers(&batch), vec!["row-0", "row-1", "row-2"]);
    }

    #[test]
    fn from_parts_requires_every_vocabulary() {
        let err = FeatureCodec::from_parts(synthetic_schema(), EncoderState::default());
        assert!(matches!(err, Err(ForecastError::InvalidSchema { .. })));
    }
}
