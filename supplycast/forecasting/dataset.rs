use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use chrono::{Datelike, Days, NaiveDate};
use indexmap::IndexMap;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ForecastResult;

/// Target column produced by [`RecordBatch::synthetic`].
pub const SYNTHETIC_TARGET: &str = "units";

/// One raw tabular row: column name to unparsed cell text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: IndexMap<String, String>,
}

impl RawRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(column, value);
        self
    }

    /// Inserts or replaces a cell.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(column.into(), value.into());
    }

    /// Removes a cell, returning its previous value.
    pub fn remove(&mut self, column: &str) -> Option<String> {
        self.fields.shift_remove(column)
    }

    /// Raw cell text for a column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Column names in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for RawRecord
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        }
    }
}

/// Ordered batch of raw rows, the unit every codec and model operation consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordBatch {
    rows: Vec<RawRecord>,
}

impl RecordBatch {
    /// Wraps already-built rows.
    #[must_use]
    pub fn new(rows: Vec<RawRecord>) -> Self {
        Self { rows }
    }

    /// Reads a headed CSV file.
    pub fn from_csv_path(path: impl AsRef<Path>) -> ForecastResult<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_csv_reader(BufReader::new(file))
    }

    /// Reads headed CSV from any reader. Cells are whitespace-trimmed.
    pub fn from_csv_reader<R: Read>(reader: R) -> ForecastResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = reader.headers()?.clone();
        let mut rows: Vec<RawRecord> = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(headers.iter().zip(record.iter()).collect());
        }
        Ok(Self { rows })
    }

    /// Deterministic demand-like dataset for demos and tests.
    ///
    /// Columns: `date` (daily from 2023-01-02), `segment` (five labels cycling by row),
    /// `price`, `promo` (0/1) and the target [`SYNTHETIC_TARGET`], a noisy linear function
    /// of segment, price, promo and month.
    #[must_use]
    pub fn synthetic(count: usize, seed: u64) -> Self {
        const SEGMENTS: [&str; 5] = ["alpha", "beta", "delta", "epsilon", "gamma"];
        let mut rng = StdRng::seed_from_u64(seed);
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap_or(NaiveDate::MIN);
        let mut rows = Vec::with_capacity(count);
        for idx in 0..count {
            let date = start
                .checked_add_days(Days::new(idx as u64))
                .unwrap_or(start);
            let segment = idx % SEGMENTS.len();
            let price: f64 = rng.gen_range(10.0..50.0);
            let promo = u8::from(rng.gen_bool(0.3));
            let noise: f64 = rng.gen_range(-4.0..4.0);
            let units = 40.0f64.mul_add(segment as f64, 120.0) - 1.5 * price
                + 25.0 * f64::from(promo)
                + 2.0 * f64::from(date.month())
                + noise;
            rows.push(
                RawRecord::new()
                    .with("date", date.format("%Y-%m-%d").to_string())
                    .with("segment", SEGMENTS[segment])
                    .with("price", format!("{price:.2}"))
                    .with("promo", promo.to_string())
                    .with(SYNTHETIC_TARGET, format!("{units:.3}")),
            );
        }
        Self { rows }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the batch holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row.
    pub fn push(&mut self, row: RawRecord) {
        self.rows.push(row);
    }

    /// Borrowed rows.
    #[must_use]
    pub fn rows(&self) -> &[RawRecord] {
        &self.rows
    }

    /// Iterator over rows.
    pub fn iter(&self) -> std::slice::Iter<'_, RawRecord> {
        self.rows.iter()
    }

    /// New batch holding clones of the rows at `indices`, in the given order.
    /// Indices past the end are skipped.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self::new(
            indices
                .iter()
                .filter_map(|&idx| self.rows.get(idx).cloned())
                .collect(),
        )
    }

    /// First `count` rows.
    #[must_use]
    pub fn head(&self, count: usize) -> Self {
        Self::new(self.rows.iter().take(count).cloned().collect())
    }
}

impl From<Vec<RawRecord>> for RecordBatch {
    fn from(rows: Vec<RawRecord>) -> Self {
        Self::new(rows)
    }
}

impl<'a> IntoIterator for &'a RecordBatch {
    type Item = &'a RawRecord;
    type IntoIter = std::slice::Iter<'a, RawRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_csv_with_trimmed_cells() {
        let raw = "Date,Store ID, Units Sold\n2022-01-01, S001 ,12\n2022-01-02,S002,7\n";
        let batch = RecordBatch::from_csv_reader(raw.as_bytes()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.rows()[0].get("Store ID"), Some("S001"));
        assert_eq!(batch.rows()[1].get("Units Sold"), Some("7"));
        let columns: Vec<_> = batch.rows()[0].columns().collect();
        assert_eq!(columns, vec!["Date", "Store ID", "Units Sold"]);
    }

    #[test]
    fn synthetic_is_deterministic_per_seed() {
        let first = RecordBatch::synthetic(30, 7);
        let second = RecordBatch::synthetic(30, 7);
        let other = RecordBatch::synthetic(30, 8);
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.rows()[0].get("date"), Some("2023-01-02"));
        assert_eq!(first.rows()[6].get("segment"), Some("beta"));
    }

    #[test]
    fn select_keeps_requested_order() {
        let batch = RecordBatch::synthetic(10, 1);
        let picked = batch.select(&[4, 0, 10]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.rows()[0], batch.rows()[4]);
        assert_eq!(picked.rows()[1], batch.rows()[0]);
    }
}
