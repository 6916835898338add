use super::FallbackProfile;
use crate::{
    codec::schema::{FeatureSchema, TemporalField},
    gbdt::Hyperparameters,
};

/// Target column.
pub const TARGET: &str = "future_demand";

/// Synthetic series shape while no model is loaded.
pub const FALLBACK: FallbackProfile = FallbackProfile {
    base: 1200,
    noise_low: -200,
    noise_high: 300,
    lower_offset: 150,
    upper_offset: 200,
};

/// Furniture supply-chain feed. Region, store type and category arrive already one-hot
/// encoded, so every non-date feature is numeric.
#[must_use]
pub fn schema() -> FeatureSchema {
    FeatureSchema::builder()
        .date_column("date", &["%Y-%m-%d", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y"])
        .identifier("product_id")
        .temporal(&[
            TemporalField::Year,
            TemporalField::Month,
            TemporalField::Day,
            TemporalField::DayOfWeek,
            TemporalField::Quarter,
        ])
        .numeric(&[
            "product_id",
            "sales_units",
            "holiday_season",
            "promotion_applied",
            "competitor_price_index",
            "economic_index",
            "weather_impact",
            "price",
            "discount_percentage",
            "sales_revenue",
            "region_Europe",
            "region_North America",
            "store_type_Retail",
            "store_type_Wholesale",
            "category_Cabinets",
            "category_Chairs",
            "category_Sofas",
            "category_Tables",
        ])
        .build()
}

/// Tuned hyperparameters.
#[must_use]
pub fn hyperparameters() -> Hyperparameters {
    Hyperparameters::new(100, 6, 0.1)
}
