use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::schema::UnseenCategoryPolicy;
use crate::error::{ForecastError, ForecastResult};

/// Sorted vocabulary of one categorical column. A value's code is its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryVocabulary {
    values: Vec<String>,
}

impl CategoryVocabulary {
    /// Builds the vocabulary from observed values; duplicates collapse.
    pub fn fit<'a>(observed: impl IntoIterator<Item = &'a str>) -> Self {
        let distinct: BTreeSet<&str> = observed.into_iter().collect();
        Self {
            values: distinct.into_iter().map(str::to_string).collect(),
        }
    }

    /// Code for a value, if it was observed during fit.
    #[must_use]
    pub fn code(&self, value: &str) -> Option<usize> {
        self.values
            .binary_search_by(|probe| probe.as_str().cmp(value))
            .ok()
    }

    /// Value for a code.
    #[must_use]
    pub fn value(&self, code: usize) -> Option<&str> {
        self.values.get(code).map(String::as_str)
    }

    /// Code reserved for unseen values under [`UnseenCategoryPolicy::ReservedCode`].
    #[must_use]
    pub fn reserved_code(&self) -> usize {
        self.values.len()
    }

    /// Number of distinct values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in code order.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub(crate) fn is_sorted_unique(&self) -> bool {
        self.values.windows(2).all(|pair| pair[0] < pair[1])
    }
}

/// Frozen category-to-code mappings, one per categorical column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncoderState {
    vocabularies: IndexMap<String, CategoryVocabulary>,
}

impl EncoderState {
    pub(crate) fn insert(&mut self, column: impl Into<String>, vocabulary: CategoryVocabulary) {
        self.vocabularies.insert(column.into(), vocabulary);
    }

    /// Vocabulary of a column.
    #[must_use]
    pub fn vocabulary(&self, column: &str) -> Option<&CategoryVocabulary> {
        self.vocabularies.get(column)
    }

    /// Encoded columns in fit order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.vocabularies.keys().map(String::as_str)
    }

    /// Encodes one cell. `row` is only used for error context.
    pub fn encode(
        &self,
        row: usize,
        column: &str,
        value: &str,
        policy: UnseenCategoryPolicy,
    ) -> ForecastResult<usize> {
        let vocabulary =
            self.vocabularies
                .get(column)
                .ok_or_else(|| ForecastError::InvalidSchema {
                    reason: format!("no fitted vocabulary for column `{column}`"),
                })?;
        match (vocabulary.code(value), policy) {
            (Some(code), _) => Ok(code),
            (None, UnseenCategoryPolicy::ReservedCode) => Ok(vocabulary.reserved_code()),
            (None, UnseenCategoryPolicy::Reject) => Err(ForecastError::UnseenCategory {
                row,
                column: column.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Decodes a code back to its category.
    #[must_use]
    pub fn decode(&self, column: &str, code: usize) -> Option<&str> {
        self.vocabularies.get(column)?.value(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> EncoderState {
        let mut state = EncoderState::default();
        state.insert(
            "Region",
            CategoryVocabulary::fit(["West", "East", "North", "East", "South"]),
        );
        state
    }

    #[test]
    fn vocabulary_is_sorted_and_starts_at_zero() {
        let state = state();
        let vocabulary = state.vocabulary("Region").unwrap();
        assert_eq!(vocabulary.values(), ["East", "North", "South", "West"]);
        assert!(vocabulary.is_sorted_unique());
        assert_eq!(
            state
                .encode(0, "Region", "East", UnseenCategoryPolicy::Reject)
                .unwrap(),
            0
        );
        assert_eq!(state.decode("Region", 3), Some("West"));
    }

    #[test]
    fn encoding_is_repeatable() {
        let state = state();
        let first = state
            .encode(0, "Region", "South", UnseenCategoryPolicy::Reject)
            .unwrap();
        let second = state
            .encode(9, "Region", "South", UnseenCategoryPolicy::Reject)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unseen_values_follow_policy() {
        let state = state();
        let err = state
            .encode(4, "Region", "Central", UnseenCategoryPolicy::Reject)
            .unwrap_err();
        assert!(matches!(
            err,
            ForecastError::UnseenCategory { row: 4, ref column, ref value }
                if column == "Region" && value == "Central"
        ));
        let reserved = state
            .encode(4, "Region", "Central", UnseenCategoryPolicy::ReservedCode)
            .unwrap();
        assert_eq!(reserved, 4);
    }
}
