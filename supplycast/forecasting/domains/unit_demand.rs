use super::FallbackProfile;
use crate::{
    codec::schema::{FeatureSchema, TemporalField},
    gbdt::Hyperparameters,
};

/// Target column.
pub const TARGET: &str = "Demand Forecast";

/// Synthetic series shape while no model is loaded.
pub const FALLBACK: FallbackProfile = FallbackProfile {
    base: 1000,
    noise_low: -100,
    noise_high: 200,
    lower_offset: 100,
    upper_offset: 150,
};

/// Store inventory feed: calendar parts, store/product attributes and stock movements.
#[must_use]
pub fn schema() -> FeatureSchema {
    FeatureSchema::builder()
        .date_column("Date", &["%Y-%m-%d", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y"])
        .identifier("Product ID")
        .temporal(&[
            TemporalField::Year,
            TemporalField::Month,
            TemporalField::Day,
            TemporalField::DayOfWeek,
            TemporalField::Quarter,
        ])
        .categorical(&[
            "Store ID",
            "Product ID",
            "Category",
            "Region",
            "Weather Condition",
            "Seasonality",
        ])
        .numeric(&[
            "Inventory Level",
            "Units Sold",
            "Units Ordered",
            "Price",
            "Discount",
            "Holiday/Promotion",
            "Competitor Pricing",
        ])
        .build()
}

/// Tuned hyperparameters.
#[must_use]
pub fn hyperparameters() -> Hyperparameters {
    Hyperparameters::new(100, 6, 0.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::FeatureCodec, dataset::RecordBatch};

    const SAMPLE: &str = "\
Date,Store ID,Product ID,Category,Region,Inventory Level,Units Sold,Units Ordered,Demand Forecast,Price,Discount,Weather Condition,Holiday/Promotion,Competitor Pricing,Seasonality
2022-01-01,S001,P0001,Groceries,North,231,127,55,135.47,33.5,20,Rainy,0,29.69,Autumn
2022-01-02,S002,P0002,Toys,South,204,150,66,144.04,63.01,20,Sunny,0,66.16,Autumn
";

    #[test]
    fn encodes_store_inventory_rows() {
        let batch = RecordBatch::from_csv_reader(SAMPLE.as_bytes()).unwrap();
        let (codec, matrix, target) = FeatureCodec::fit_transform(schema(), &batch, TARGET).unwrap();
        assert_eq!(matrix.n_features(), 18);
        assert_eq!(matrix.columns()[5], "Store ID_encoded");
        assert_eq!(matrix.columns()[17], "Competitor Pricing");
        assert_eq!(target, vec![135.47, 144.04]);
        // 2022-01-01 was a Saturday.
        assert_eq!(matrix.row(0)[3], 5.0);
        assert_eq!(codec.identifiers(&batch), vec!["P0001", "P0002"]);
    }
}
