//! Catalogue of the forecasting domains served by the engine.

/// Retail demand per product code and warehouse.
pub mod retail_demand;
/// Supply-chain demand with one-hot encoded attributes.
pub mod supply_chain;
/// Store-level unit demand.
pub mod unit_demand;
/// Weekly store sales.
pub mod weekly_sales;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    codec::schema::FeatureSchema,
    engine::EngineConfig,
    error::{ForecastError, ForecastResult},
    gbdt::Hyperparameters,
};

/// Shape of the synthetic series served while a domain has no trained model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackProfile {
    /// Centre of the generated values.
    pub base: i64,
    /// Inclusive lower end of the noise added to `base`.
    pub noise_low: i64,
    /// Exclusive upper end of the noise added to `base`.
    pub noise_high: i64,
    /// Distance from the value down to its lower bound.
    pub lower_offset: i64,
    /// Distance from the value up to its upper bound.
    pub upper_offset: i64,
}

/// Forecasting domain key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Store-level unit demand.
    UnitDemand,
    /// Retail order demand.
    RetailDemand,
    /// Supply-chain future demand.
    SupplyChainDemand,
    /// Weekly store sales.
    WeeklySales,
}

impl Domain {
    /// Every domain, in catalogue order.
    pub const ALL: [Self; 4] = [
        Self::UnitDemand,
        Self::RetailDemand,
        Self::SupplyChainDemand,
        Self::WeeklySales,
    ];

    /// Stable key used in settings, logs and artifact names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnitDemand => "unit_demand",
            Self::RetailDemand => "retail_demand",
            Self::SupplyChainDemand => "supply_chain_demand",
            Self::WeeklySales => "weekly_sales",
        }
    }

    /// Declared feature schema.
    #[must_use]
    pub fn schema(self) -> FeatureSchema {
        match self {
            Self::UnitDemand => unit_demand::schema(),
            Self::RetailDemand => retail_demand::schema(),
            Self::SupplyChainDemand => supply_chain::schema(),
            Self::WeeklySales => weekly_sales::schema(),
        }
    }

    /// Target column.
    #[must_use]
    pub const fn target(self) -> &'static str {
        match self {
            Self::UnitDemand => unit_demand::TARGET,
            Self::RetailDemand => retail_demand::TARGET,
            Self::SupplyChainDemand => supply_chain::TARGET,
            Self::WeeklySales => weekly_sales::TARGET,
        }
    }

    /// Tuned hyperparameters.
    #[must_use]
    pub fn hyperparameters(self) -> Hyperparameters {
        match self {
            Self::UnitDemand => unit_demand::hyperparameters(),
            Self::RetailDemand => retail_demand::hyperparameters(),
            Self::SupplyChainDemand => supply_chain::hyperparameters(),
            Self::WeeklySales => weekly_sales::hyperparameters(),
        }
    }

    /// Synthetic series shape used when no model is loaded.
    #[must_use]
    pub const fn fallback(self) -> FallbackProfile {
        match self {
            Self::UnitDemand => unit_demand::FALLBACK,
            Self::RetailDemand => retail_demand::FALLBACK,
            Self::SupplyChainDemand => supply_chain::FALLBACK,
            Self::WeeklySales => weekly_sales::FALLBACK,
        }
    }

    /// Engine config with default thresholds.
    #[must_use]
    pub fn config(self) -> EngineConfig {
        EngineConfig::new(self.as_str(), self.schema(), self.target())
            .with_hyperparameters(self.hyperparameters())
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = ForecastError;

    fn from_str(raw: &str) -> ForecastResult<Self> {
        let key = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|domain| domain.as_str() == key)
            .ok_or_else(|| ForecastError::UnknownDomain(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip() {
        for domain in Domain::ALL {
            assert_eq!(domain.as_str().parse::<Domain>().unwrap(), domain);
            assert_eq!(domain.to_string(), domain.as_str());
        }
        assert_eq!("Weekly-Sales".parse::<Domain>().unwrap(), Domain::WeeklySales);
        assert!(matches!(
            "route_optimization".parse::<Domain>(),
            Err(ForecastError::UnknownDomain(_))
        ));
        let json = serde_json::to_string(&Domain::SupplyChainDemand).unwrap();
        assert_eq!(json, "\"supply_chain_demand\"");
    }

    #[test]
    fn every_schema_is_valid_and_rejects_unseen_values() {
        for domain in Domain::ALL {
            let config = domain.config();
            assert!(config.validate().is_ok(), "{domain}");
            assert_eq!(
                config.schema.unseen_policy(),
                crate::codec::schema::UnseenCategoryPolicy::Reject
            );
            assert!(config.schema.identifier_column().is_some());
            let fallback = domain.fallback();
            assert!(fallback.noise_low < fallback.noise_high);
        }
    }
}
