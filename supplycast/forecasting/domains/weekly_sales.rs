use super::FallbackProfile;
use crate::{
    codec::schema::{FeatureSchema, TemporalField},
    gbdt::Hyperparameters,
};

/// Target column.
pub const TARGET: &str = "Weekly_Sales";

/// Synthetic series shape while no model is loaded.
pub const FALLBACK: FallbackProfile = FallbackProfile {
    base: 2500,
    noise_low: -400,
    noise_high: 600,
    lower_offset: 250,
    upper_offset: 350,
};

/// Weekly store sales with macro indicators. Dates are day-first; the store number leads the
/// feature list ahead of the calendar parts.
#[must_use]
pub fn schema() -> FeatureSchema {
    FeatureSchema::builder()
        .date_column("Date", &["%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d"])
        .identifier("Store")
        .numeric(&["Store"])
        .temporal(&[
            TemporalField::Year,
            TemporalField::Month,
            TemporalField::IsoWeek,
            TemporalField::DayOfWeek,
        ])
        .numeric(&[
            "Holiday_Flag",
            "Temperature",
            "Fuel_Price",
            "CPI",
            "Unemployment",
        ])
        .build()
}

/// Tuned hyperparameters.
#[must_use]
pub fn hyperparameters() -> Hyperparameters {
    Hyperparameters::new(150, 7, 0.05)
}
