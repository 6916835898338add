use super::FallbackProfile;
use crate::{
    codec::schema::{FeatureSchema, TemporalField},
    gbdt::Hyperparameters,
};

/// Target column.
pub const TARGET: &str = "Order_Demand";

/// Synthetic series shape while no model is loaded.
pub const FALLBACK: FallbackProfile = FallbackProfile {
    base: 850,
    noise_low: -150,
    noise_high: 250,
    lower_offset: 120,
    upper_offset: 180,
};

/// Warehouse order feed. Dates arrive in several layouts, slash-separated year-first is the
/// most common.
#[must_use]
pub fn schema() -> FeatureSchema {
    FeatureSchema::builder()
        .date_column("Date", &["%Y/%m/%d", "%Y-%m-%d", "%m/%d/%Y", "%Y-%m-%d %H:%M:%S"])
        .identifier("Product_Code")
        .temporal(&[
            TemporalField::Year,
            TemporalField::Month,
            TemporalField::Day,
            TemporalField::DayOfWeek,
            TemporalField::Quarter,
        ])
        .categorical(&["Product_Code", "Warehouse", "Product_Category"])
        .numeric(&["Open", "Promo", "StateHoliday", "SchoolHoliday", "Petrol_price"])
        .build()
}

/// Tuned hyperparameters.
#[must_use]
pub fn hyperparameters() -> Hyperparameters {
    Hyperparameters::new(120, 8, 0.08)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::FeatureCodec, dataset::RecordBatch, error::ForecastError};

    const SAMPLE: &str = "\
Product_Code,Warehouse,Product_Category,Date,Order_Demand,Open,Promo,StateHoliday,SchoolHoliday,Petrol_price
Product_0993,Whse_J,Category_028,2012/7/27,100,1,0,0,0,91
Product_0979,Whse_J,Category_028,2012-01-19,500,1,0,0,0,85
";

    #[test]
    fn accepts_mixed_date_layouts() {
        let batch = RecordBatch::from_csv_reader(SAMPLE.as_bytes()).unwrap();
        let (codec, matrix, _) = FeatureCodec::fit_transform(schema(), &batch, TARGET).unwrap();
        assert_eq!(matrix.n_features(), 13);
        assert_eq!(matrix.row(0)[1], 7.0);
        assert_eq!(matrix.row(1)[0], 2012.0);
        // "Product_0979" sorts before "Product_0993".
        assert_eq!(matrix.row(0)[5], 1.0);
        assert_eq!(matrix.row(1)[5], 0.0);

        let mut novel = batch.head(1);
        let mut row = novel.rows()[0].clone();
        row.insert("Warehouse", "Whse_Z");
        novel.push(row);
        assert!(matches!(
            codec.transform(&novel),
            Err(ForecastError::UnseenCategory { row: 1, .. })
        ));
    }
}
