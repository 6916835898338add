use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};

/// Calendar component derived from the schema's date column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TemporalField {
    /// Calendar year.
    Year,
    /// Month, 1-12.
    Month,
    /// Day of month, 1-31.
    Day,
    /// Day of week, Monday = 0.
    DayOfWeek,
    /// Quarter, 1-4.
    Quarter,
    /// ISO-8601 week number.
    IsoWeek,
}

impl TemporalField {
    /// Feature name used in the matrix header.
    #[must_use]
    pub const fn feature_name(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::DayOfWeek => "day_of_week",
            Self::Quarter => "quarter",
            Self::IsoWeek => "week",
        }
    }

    /// Extracts the component from a date.
    #[must_use]
    pub fn extract(self, date: NaiveDate) -> f64 {
        match self {
            Self::Year => f64::from(date.year()),
            Self::Month => f64::from(date.month()),
            Self::Day => f64::from(date.day()),
            Self::DayOfWeek => f64::from(date.weekday().num_days_from_monday()),
            Self::Quarter => f64::from((date.month() - 1) / 3 + 1),
            Self::IsoWeek => f64::from(date.iso_week().week()),
        }
    }
}

/// How inference treats categorical values absent from the training vocabulary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnseenCategoryPolicy {
    /// Fail the whole batch with `UnseenCategory`.
    #[default]
    Reject,
    /// Encode as the code one past the frozen vocabulary.
    ReservedCode,
}

/// Date column and the formats tried, in order, when parsing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateColumn {
    /// Column name.
    pub name: String,
    /// `chrono` format strings, date-only or date-time.
    pub formats: Vec<String>,
}

/// Origin of one matrix column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "source", rename_all = "snake_case")]
pub enum FeatureSource {
    /// Calendar component of the date column.
    Temporal(TemporalField),
    /// Encoded categorical column.
    Categorical(String),
    /// Numeric column passed through.
    Numeric(String),
}

impl FeatureSource {
    /// Feature name as it appears in the matrix header.
    #[must_use]
    pub fn feature_name(&self) -> String {
        match self {
            Self::Temporal(field) => field.feature_name().to_string(),
            Self::Categorical(column) => format!("{column}_encoded"),
            Self::Numeric(column) => column.clone(),
        }
    }
}

/// Ordered declaration of the features a model consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureSchema {
    date_column: Option<DateColumn>,
    identifier_column: Option<String>,
    unseen_policy: UnseenCategoryPolicy,
    features: Vec<FeatureSource>,
}

impl FeatureSchema {
    /// Starts a schema declaration.
    #[must_use]
    pub fn builder() -> FeatureSchemaBuilder {
        FeatureSchemaBuilder::default()
    }

    /// Features in matrix order.
    #[must_use]
    pub fn features(&self) -> &[FeatureSource] {
        &self.features
    }

    /// Matrix header, in matrix order.
    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(FeatureSource::feature_name).collect()
    }

    /// Temporal fields in matrix order.
    #[must_use]
    pub fn derived_temporal(&self) -> Vec<TemporalField> {
        self.features
            .iter()
            .filter_map(|feature| match feature {
                FeatureSource::Temporal(field) => Some(*field),
                _ => None,
            })
            .collect()
    }

    /// Categorical source columns in matrix order.
    #[must_use]
    pub fn categorical(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter_map(|feature| match feature {
                FeatureSource::Categorical(column) => Some(column.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Numeric source columns in matrix order.
    #[must_use]
    pub fn numeric(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter_map(|feature| match feature {
                FeatureSource::Numeric(column) => Some(column.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Date column, if declared.
    #[must_use]
    pub const fn date_column(&self) -> Option<&DateColumn> {
        self.date_column.as_ref()
    }

    /// Column whose value identifies a prediction record.
    #[must_use]
    pub fn identifier_column(&self) -> Option<&str> {
        self.identifier_column.as_deref()
    }

    /// Unseen-category policy.
    #[must_use]
    pub const fn unseen_policy(&self) -> UnseenCategoryPolicy {
        self.unseen_policy
    }

    /// Raw columns every input row must carry.
    #[must_use]
    pub fn required_columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        if !self.derived_temporal().is_empty() {
            if let Some(date) = &self.date_column {
                columns.push(date.name.as_str());
            }
        }
        for feature in &self.features {
            match feature {
                FeatureSource::Categorical(column) | FeatureSource::Numeric(column) => {
                    if !columns.contains(&column.as_str()) {
                        columns.push(column.as_str());
                    }
                }
                FeatureSource::Temporal(_) => {}
            }
        }
        columns
    }

    /// Checks the declaration is internally consistent.
    pub fn validate(&self) -> ForecastResult<()> {
        if self.features.is_empty() {
            return Err(invalid("schema declares no features"));
        }
        if !self.derived_temporal().is_empty() {
            match &self.date_column {
                None => return Err(invalid("temporal features require a date column")),
                Some(date) if date.formats.is_empty() => {
                    return Err(invalid(format!(
                        "date column `{}` declares no formats",
                        date.name
                    )))
                }
                Some(_) => {}
            }
        }
        let mut seen = HashSet::new();
        for name in self.feature_names() {
            if !seen.insert(name.clone()) {
                return Err(invalid(format!("duplicate feature `{name}`")));
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ForecastError {
    ForecastError::InvalidSchema {
        reason: reason.into(),
    }
}

/// Builder that records features in call order.
#[derive(Debug, Default)]
pub struct FeatureSchemaBuilder {
    date_column: Option<DateColumn>,
    identifier_column: Option<String>,
    unseen_policy: UnseenCategoryPolicy,
    features: Vec<FeatureSource>,
}

impl FeatureSchemaBuilder {
    /// Declares the date column and its accepted formats.
    #[must_use]
    pub fn date_column(mut self, name: impl Into<String>, formats: &[&str]) -> Self {
        self.date_column = Some(DateColumn {
            name: name.into(),
            formats: formats.iter().map(|fmt| (*fmt).to_string()).collect(),
        });
        self
    }

    /// Declares the identifier column for prediction records.
    #[must_use]
    pub fn identifier(mut self, column: impl Into<String>) -> Self {
        self.identifier_column = Some(column.into());
        self
    }

    /// Sets the unseen-category policy.
    #[must_use]
    pub const fn unseen_policy(mut self, policy: UnseenCategoryPolicy) -> Self {
        self.unseen_policy = policy;
        self
    }

    /// Appends temporal features.
    #[must_use]
    pub fn temporal(mut self, fields: &[TemporalField]) -> Self {
        self.features
            .extend(fields.iter().copied().map(FeatureSource::Temporal));
        self
    }

    /// Appends categorical features.
    #[must_use]
    pub fn categorical(mut self, columns: &[&str]) -> Self {
        self.features.extend(
            columns
                .iter()
                .map(|column| FeatureSource::Categorical((*column).to_string())),
        );
        self
    }

    /// Appends numeric features.
    #[must_use]
    pub fn numeric(mut self, columns: &[&str]) -> Self {
        self.features.extend(
            columns
                .iter()
                .map(|column| FeatureSource::Numeric((*column).to_string())),
        );
        self
    }

    /// Finishes the declaration. Consistency is checked by [`FeatureSchema::validate`].
    #[must_use]
    pub fn build(self) -> FeatureSchema {
        FeatureSchema {
            date_column: self.date_column,
            identifier_column: self.identifier_column,
            unseen_policy: self.unseen_policy,
            features: self.features,
        }
    }
}

/// Schema matching [`crate::dataset::RecordBatch::synthetic`].
#[cfg(test)]
pub(crate) fn synthetic_schema() -> FeatureSchema {
    FeatureSchema::builder()
        .date_column("date", &["%Y-%m-%d"])
        .identifier("segment")
        .temporal(&[
            TemporalField::Year,
            TemporalField::Month,
            TemporalField::Day,
            TemporalField::DayOfWeek,
            TemporalField::Quarter,
        ])
        .categorical(&["segment"])
        .numeric(&["price", "promo"])
        .build()
}
