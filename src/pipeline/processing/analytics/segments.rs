use polars::prelude::*;
use tracing::{info, instrument, warn};

use super::{by_count_then_key, market_share, rent_aggregates, AnalysisOutcome, MarketAnalytics};
use crate::constants::*;
use crate::dataset::count_where;
use crate::error::Result;
use crate::pipeline::processing::enrich::{luxury_flag, luxury_thresholds, price_per_sqft};

impl MarketAnalytics<'_> {
    /// Per-area statistics over the PSF subset.
    ///
    /// Contracts without an area name form their own group. Areas with fewer than
    /// `min_area_sample_size` contracts are dropped.
    #[instrument(skip_all)]
    pub fn analyze_by_area(&self) -> Result<AnalysisOutcome> {
        info!("Analyzing by area");
        let area_name = self.config.schema.area_name.as_str();
        if let Some(not_applicable) = self.require(&[area_name]) {
            warn!("{} column not found, area analysis unavailable", area_name);
            return Ok(not_applicable);
        }

        let subset = match self.calculate_psf_metrics()? {
            AnalysisOutcome::Rows(df) => df,
            other => return Ok(other),
        };

        let mut aggregates = rent_aggregates(self.amount());
        aggregates.extend([
            col(PSF).mean().alias(AVG_PSF),
            col(PSF).median().alias(MEDIAN_PSF),
            col(self.area()).mean().alias(AVG_AREA),
        ]);

        let min_sample = self.config.metrics.min_area_sample_size as i64;
        let grouped = subset
            .lazy()
            .group_by([col(area_name)])
            .agg(aggregates)
            .filter(col(CONTRACT_COUNT).gt_eq(lit(min_sample)));
        let df = by_count_then_key(grouped, area_name).collect()?;

        info!("Analyzed {} areas", df.height());
        Ok(AnalysisOutcome::from_frame(
            df,
            format!("no area has at least {} contracts", min_sample),
        ))
    }

    /// The `top_n` busiest areas with their share of all qualifying areas.
    #[instrument(skip(self))]
    pub fn identify_high_demand_areas(&self, top_n: usize) -> Result<AnalysisOutcome> {
        let by_area = match self.analyze_by_area()? {
            AnalysisOutcome::Rows(df) => df,
            other => return Ok(other),
        };

        // Share is taken over every area before truncating to the top N
        let df = by_area
            .lazy()
            .with_column(market_share())
            .limit(top_n as IdxSize)
            .collect()?;

        info!("Identified {} high-demand areas", df.height());
        Ok(AnalysisOutcome::from_frame(df, "top_n is zero"))
    }

    /// Rent statistics per property type, falling back to the sub-type column.
    #[instrument(skip_all)]
    pub fn analyze_by_property_type(&self) -> Result<AnalysisOutcome> {
        info!("Analyzing by property type");
        let schema = &self.config.schema;
        let key = if self.require(&[&schema.property_type]).is_none() {
            schema.property_type.as_str()
        } else if self.require(&[&schema.property_sub_type]).is_none() {
            warn!(
                "{} column not found, using {}",
                schema.property_type, schema.property_sub_type
            );
            schema.property_sub_type.as_str()
        } else {
            return Ok(AnalysisOutcome::NotApplicable {
                missing_columns: vec![
                    schema.property_type.clone(),
                    schema.property_sub_type.clone(),
                ],
            });
        };

        let df = self.grouped_rent_stats(key, false)?;
        info!("Analyzed {} property types", df.height());
        Ok(AnalysisOutcome::from_frame(df, "no contract has a positive rent"))
    }

    /// Rent statistics per usage value, with no minimum group size.
    #[instrument(skip_all)]
    pub fn segment_by_usage(&self) -> Result<AnalysisOutcome> {
        info!("Segmenting by property usage");
        let with_psf = self.require(&[self.area()]).is_none();
        let df = self.grouped_rent_stats(self.usage(), with_psf)?;
        info!("Analyzed {} usage categories", df.height());
        Ok(AnalysisOutcome::from_frame(df, "no contract has a positive rent"))
    }

    fn grouped_rent_stats(&self, key: &str, with_psf: bool) -> Result<DataFrame> {
        let mut aggregates = rent_aggregates(self.amount());
        if with_psf {
            let psf = price_per_sqft(self.amount(), self.area());
            aggregates.extend([
                psf.clone().mean().alias(AVG_PSF),
                psf.median().alias(MEDIAN_PSF),
            ]);
        }

        let grouped = self
            .valid_rents()
            .group_by([col(key)])
            .agg(aggregates)
            .with_column(market_share());
        Ok(by_count_then_key(grouped, key).collect()?)
    }

    /// PSF subset tagged with `is_luxury` at the configured percentiles.
    ///
    /// Applying this to its own output tags the same rows.
    #[instrument(skip_all)]
    pub fn identify_luxury_properties(&self) -> Result<AnalysisOutcome> {
        info!("Identifying luxury properties");
        let subset = match self.calculate_psf_metrics()? {
            AnalysisOutcome::Rows(df) => df,
            other => return Ok(other),
        };

        let amount = self.amount();
        let flag = match luxury_thresholds(&subset, PSF, amount, &self.config.metrics)? {
            Some((psf_threshold, rent_threshold)) => {
                luxury_flag(PSF, amount, psf_threshold, rent_threshold)
            }
            None => lit(false),
        };
        let tagged = subset.lazy().with_column(flag.alias(IS_LUXURY)).collect()?;

        let luxury_count = count_where(&tagged, col(IS_LUXURY))?;
        let luxury_pct = luxury_count as f64 / tagged.height() as f64 * 100.0;
        info!(
            "Identified {} luxury properties ({:.1}%)",
            luxury_count, luxury_pct
        );
        Ok(AnalysisOutcome::Rows(tagged))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::MarketConfig;

    fn repeat<T: Clone>(value: T, n: usize) -> Vec<T> {
        vec![value; n]
    }

    #[test]
    fn areas_below_min_sample_are_dropped() {
        let config = MarketConfig::default();
        let df = contracts(
            &repeat("Deira", 9),
            &repeat("Residential", 9),
            &repeat(60_000.0, 9),
            &repeat(1_000.0, 9),
        );
        let analytics = MarketAnalytics::new(&df, &config).unwrap();
        let outcome = analytics.analyze_by_area().unwrap();
        assert!(outcome.is_empty(), "{:?}", outcome);
    }

    #[test]
    fn by_area_sorted_by_count_then_name() {
        let mut config = MarketConfig::default();
        config.metrics.min_area_sample_size = 2;

        let mut areas = repeat("Mirdif", 2);
        areas.extend(repeat("Deira", 3));
        areas.extend(repeat("Al Nahda", 2));
        areas.push("Motor City");
        let n = areas.len();
        let df = contracts(
            &areas,
            &repeat("Residential", n),
            &repeat(80_000.0, n),
            &repeat(1_000.0, n),
        );
        let analytics = MarketAnalytics::new(&df, &config).unwrap();
        let by_area = analytics.analyze_by_area().unwrap().into_rows().unwrap();

        assert_eq!(
            strs(&by_area, "area_name_en"),
            vec![
                Some("Deira".to_string()),
                Some("Al Nahda".to_string()),
                Some("Mirdif".to_string()),
            ]
        );
        assert_eq!(f64s(&by_area, CONTRACT_COUNT), vec![Some(3.0), Some(2.0), Some(2.0)]);
        assert_eq!(f64s(&by_area, AVG_PSF), vec![Some(80.0); 3]);
    }

    #[test]
    fn high_demand_share_uses_all_areas() {
        let mut config = MarketConfig::default();
        config.metrics.min_area_sample_size = 1;

        let areas = ["Deira", "Deira", "Deira", "Mirdif", "Al Nahda"];
        let df = contracts(
            &areas,
            &repeat("Residential", 5),
            &repeat(80_000.0, 5),
            &repeat(1_000.0, 5),
        );
        let analytics = MarketAnalytics::new(&df, &config).unwrap();
        let top = analytics.identify_high_demand_areas(1).unwrap().into_rows().unwrap();

        assert_eq!(top.height(), 1);
        let share = f64s(&top, MARKET_SHARE_PCT)[0].unwrap();
        assert!((share - 60.0).abs() < 1e-9);
    }

    #[test]
    fn contracts_without_area_form_their_own_group() {
        let mut config = MarketConfig::default();
        config.metrics.min_area_sample_size = 1;

        let df = df!(
            "contract_id" => ["C0", "C1", "C2", "C3"],
            "area_name_en" => [Some("Deira"), Some("Deira"), None, Some("Mirdif")],
            "property_usage_en" => repeat("Residential", 4),
            "annual_amount" => repeat(80_000.0, 4),
            "actual_area" => repeat(1_000.0, 4),
        )
        .unwrap();
        let analytics = MarketAnalytics::new(&df, &config).unwrap();

        let by_area = analytics.analyze_by_area().unwrap().into_rows().unwrap();
        assert_eq!(by_area.height(), 3);
        assert_eq!(by_area.column("area_name_en").unwrap().null_count(), 1);

        let top = analytics.identify_high_demand_areas(1).unwrap().into_rows().unwrap();
        let share = f64s(&top, MARKET_SHARE_PCT)[0].unwrap();
        assert!((share - 50.0).abs() < 1e-9);
    }

    #[test]
    fn usage_market_shares_sum_to_hundred() {
        let config = MarketConfig::default();
        let df = contracts(
            &["A", "B", "C", "D", "E", "F", "G"],
            &[
                "Residential",
                "Commercial",
                "Residential",
                "Industrial",
                "Commercial",
                "Residential",
                "Hospitality",
            ],
            &[50_000.0, 90_000.0, 70_000.0, 30_000.0, -1.0, 65_000.0, 120_000.0],
            &[900.0, 1_500.0, 1_100.0, 4_000.0, 700.0, 1_000.0, 2_000.0],
        );
        let analytics = MarketAnalytics::new(&df, &config).unwrap();
        let usage = analytics.segment_by_usage().unwrap().into_rows().unwrap();

        let total: f64 = f64s(&usage, MARKET_SHARE_PCT).into_iter().flatten().sum();
        assert!((total - 100.0).abs() < 1e-6);
        assert_eq!(
            strs(&usage, "property_usage_en")[0],
            Some("Residential".to_string())
        );
        // The negative commercial rent is excluded
        assert_eq!(f64s(&usage, CONTRACT_COUNT), vec![Some(3.0), Some(1.0), Some(1.0), Some(1.0)]);
        assert!(usage.schema().contains(AVG_PSF));
    }

    #[test]
    fn property_type_falls_back_to_sub_type() {
        let config = MarketConfig::default();
        let df = df!(
            "annual_amount" => [50_000.0, 60_000.0, 0.0],
            "property_usage_en" => ["Residential", "Residential", "Residential"],
            "ejari_property_sub_type_en" => ["Flat", "Flat", "Villa"],
        )
        .unwrap();
        let analytics = MarketAnalytics::new(&df, &config).unwrap();
        let types = analytics.analyze_by_property_type().unwrap().into_rows().unwrap();

        assert_eq!(types.height(), 1);
        assert_eq!(f64s(&types, AVG_RENT), vec![Some(55_000.0)]);
        assert_eq!(f64s(&types, MARKET_SHARE_PCT), vec![Some(100.0)]);
    }

    #[test]
    fn property_type_without_either_column_is_not_applicable() {
        let config = MarketConfig::default();
        let df = df!(
            "annual_amount" => [50_000.0],
            "property_usage_en" => ["Residential"],
        )
        .unwrap();
        let analytics = MarketAnalytics::new(&df, &config).unwrap();
        assert!(analytics
            .analyze_by_property_type()
            .unwrap()
            .is_not_applicable());
    }

    #[test]
    fn luxury_identification_is_idempotent() {
        let config = MarketConfig::default();
        let amounts = [40_000.0, 55_000.0, 60_000.0, 75_000.0, 90_000.0, 150_000.0, 300_000.0];
        let sizes = [800.0, 1_000.0, 900.0, 1_200.0, 700.0, 1_500.0, 2_000.0];
        let n = amounts.len();
        let df = contracts(&repeat("Dubai Marina", n), &repeat("Residential", n), &amounts, &sizes);

        let first = MarketAnalytics::new(&df, &config)
            .unwrap()
            .identify_luxury_properties()
            .unwrap()
            .into_rows()
            .unwrap();
        let second = MarketAnalytics::new(&first, &config)
            .unwrap()
            .identify_luxury_properties()
            .unwrap()
            .into_rows()
            .unwrap();

        let flags = |df: &DataFrame| -> Vec<Option<bool>> {
            df.column(IS_LUXURY).unwrap().bool().unwrap().into_iter().collect()
        };
        assert_eq!(flags(&first), flags(&second));
        assert!(flags(&first).contains(&Some(true)));
        assert!(flags(&first).contains(&Some(false)));
    }
}
