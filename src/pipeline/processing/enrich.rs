use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::{AreaTier, MarketConfig, MarketMetrics};
use crate::constants::*;
use crate::dataset::{column_dtype, epoch_days, has_column, is_positive, is_temporal, quantiles};
use crate::error::Result;

/// A derivation that could not run on this dataset
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedDerivation {
    /// Name of the derivation (the column it would have produced)
    pub derivation: String,
    /// Why it was not applicable
    pub reason: String,
}

/// Which derivations ran and which were not applicable
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentReport {
    pub applied: Vec<String>,
    pub skipped: Vec<SkippedDerivation>,
}

impl EnrichmentReport {
    pub fn was_applied(&self, derivation: &str) -> bool {
        self.applied.iter().any(|d| d == derivation)
    }

    fn skip(&mut self, derivation: &str, reason: impl Into<String>) {
        let reason = reason.into();
        debug!("Skipping {}: {}", derivation, reason);
        self.skipped.push(SkippedDerivation {
            derivation: derivation.to_string(),
            reason,
        });
    }
}

/// Enriched dataset together with the report describing how it was produced
#[derive(Debug, Clone)]
pub struct EnrichedDataset {
    pub data: DataFrame,
    pub report: EnrichmentReport,
}

/// Trait for column-additive enrichment of a contract dataset
pub trait Enricher {
    /// Derive new columns; the input rows and their order are preserved.
    fn enrich(&self, df: &DataFrame) -> Result<EnrichedDataset>;
}

/// Default enricher driven by the market configuration
pub struct DefaultEnricher<'a> {
    config: &'a MarketConfig,
}

impl<'a> DefaultEnricher<'a> {
    pub fn new(config: &'a MarketConfig) -> Self {
        Self { config }
    }

    fn require(
        &self,
        df: &DataFrame,
        derivation: &str,
        columns: &[&str],
        report: &mut EnrichmentReport,
    ) -> bool {
        let missing: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|c| !has_column(df, c))
            .collect();
        if missing.is_empty() {
            true
        } else {
            report.skip(derivation, format!("missing columns: {}", missing.join(", ")));
            false
        }
    }

    fn add_psf(&self, df: DataFrame, report: &mut EnrichmentReport) -> Result<DataFrame> {
        let schema = &self.config.schema;
        let (amount, area) = (schema.amount.as_str(), schema.area.as_str());
        if !self.require(&df, PRICE_PER_SQFT, &[amount, area], report) {
            return Ok(df);
        }

        let df = df
            .lazy()
            .with_column(price_per_sqft(amount, area).alias(PRICE_PER_SQFT))
            .collect()?;
        report.applied.push(PRICE_PER_SQFT.to_string());
        Ok(df)
    }

    fn add_area_tier(&self, df: DataFrame, report: &mut EnrichmentReport) -> Result<DataFrame> {
        let area_name = self.config.schema.area_name.as_str();
        if !self.require(&df, AREA_TIER, &[area_name], report) {
            return Ok(df);
        }

        let (names, tiers): (Vec<&str>, Vec<&str>) = self
            .config
            .area_tiers
            .0
            .iter()
            .map(|(name, tier)| (name.as_str(), tier.as_str()))
            .unzip();
        let fallback = AreaTier::default().as_str();
        let tier = col(area_name)
            .cast(DataType::String)
            .replace_strict(
                lit(Series::new("area_name".into(), names)),
                lit(Series::new("tier".into(), tiers)),
                Some(lit(fallback)),
                Some(DataType::String),
            )
            .fill_null(lit(fallback));

        let df = df.lazy().with_column(tier.alias(AREA_TIER)).collect()?;
        report.applied.push(AREA_TIER.to_string());
        Ok(df)
    }

    /// Canonical names are resolved once per distinct raw label, then mapped over the column.
    fn add_property_type(&self, df: DataFrame, report: &mut EnrichmentReport) -> Result<DataFrame> {
        let property_type = self.config.schema.property_type.as_str();
        if !self.require(&df, PROPERTY_TYPE_NORMALIZED, &[property_type], report) {
            return Ok(df);
        }

        let raw = col(property_type).cast(DataType::String);
        let distinct = df
            .clone()
            .lazy()
            .select([raw.clone().unique().alias("raw")])
            .collect()?;
        let labels: Vec<&str> = distinct.column("raw")?.str()?.into_iter().flatten().collect();
        let canonical: Vec<String> = labels
            .iter()
            .map(|label| self.config.normalize_property_type(label))
            .collect();

        let normalized = raw.replace_strict(
            lit(Series::new("raw".into(), labels)),
            lit(Series::new("canonical".into(), canonical)),
            Some(lit(NULL).cast(DataType::String)),
            Some(DataType::String),
        );
        let df = df
            .lazy()
            .with_column(normalized.alias(PROPERTY_TYPE_NORMALIZED))
            .collect()?;
        report.applied.push(PROPERTY_TYPE_NORMALIZED.to_string());
        Ok(df)
    }

    fn add_temporal_features(
        &self,
        df: DataFrame,
        report: &mut EnrichmentReport,
    ) -> Result<DataFrame> {
        let start = self.config.schema.start_date.as_str();
        if !self.require(&df, CONTRACT_SEASON, &[start], report) {
            return Ok(df);
        }
        if !column_dtype(&df, start).map_or(false, |d| is_temporal(&d)) {
            report.skip(CONTRACT_SEASON, format!("'{}' is not a date column", start));
            return Ok(df);
        }

        let date = col(start).cast(DataType::Date);
        let df = df
            .lazy()
            .with_columns([
                date.clone().dt().year().alias(CONTRACT_YEAR),
                date.clone().dt().quarter().alias(CONTRACT_QUARTER),
                date.clone().dt().month().alias(CONTRACT_MONTH),
                date.dt().weekday().alias(CONTRACT_WEEKDAY),
            ])
            .with_column(season(col(CONTRACT_MONTH)).alias(CONTRACT_SEASON))
            .collect()?;
        for derivation in [CONTRACT_YEAR, CONTRACT_QUARTER, CONTRACT_MONTH, CONTRACT_WEEKDAY, CONTRACT_SEASON] {
            report.applied.push(derivation.to_string());
        }
        Ok(df)
    }

    fn add_duration(&self, df: DataFrame, report: &mut EnrichmentReport) -> Result<DataFrame> {
        let schema = &self.config.schema;
        let (start, end) = (schema.start_date.as_str(), schema.end_date.as_str());
        if !self.require(&df, CONTRACT_DURATION_DAYS, &[start, end], report) {
            return Ok(df);
        }
        let both_dates = [start, end]
            .iter()
            .all(|c| column_dtype(&df, c).map_or(false, |d| is_temporal(&d)));
        if !both_dates {
            report.skip(CONTRACT_DURATION_DAYS, "contract dates are not date columns");
            return Ok(df);
        }

        let df = df
            .lazy()
            .with_column((epoch_days(end) - epoch_days(start)).alias(CONTRACT_DURATION_DAYS))
            .with_column(
                duration_category(col(CONTRACT_DURATION_DAYS)).alias(CONTRACT_DURATION_CATEGORY),
            )
            .collect()?;
        report.applied.push(CONTRACT_DURATION_DAYS.to_string());
        report.applied.push(CONTRACT_DURATION_CATEGORY.to_string());
        Ok(df)
    }

    fn add_luxury_flag(&self, df: DataFrame, report: &mut EnrichmentReport) -> Result<DataFrame> {
        let amount = self.config.schema.amount.as_str();
        if !self.require(&df, IS_LUXURY, &[PRICE_PER_SQFT, amount], report) {
            return Ok(df);
        }

        let flag = match luxury_thresholds(&df, PRICE_PER_SQFT, amount, &self.config.metrics)? {
            Some((psf_threshold, rent_threshold)) => {
                debug!(psf_threshold, rent_threshold, "Luxury thresholds");
                luxury_flag(PRICE_PER_SQFT, amount, psf_threshold, rent_threshold)
            }
            None => lit(false),
        };
        let df = df.lazy().with_column(flag.alias(IS_LUXURY)).collect()?;
        report.applied.push(IS_LUXURY.to_string());
        Ok(df)
    }

    fn add_usage_category(
        &self,
        df: DataFrame,
        report: &mut EnrichmentReport,
    ) -> Result<DataFrame> {
        let usage = self.config.schema.usage.as_str();
        if !self.require(&df, USAGE_CATEGORY, &[usage], report) {
            return Ok(df);
        }

        let lowered = col(usage).cast(DataType::String).str().to_lowercase();
        let category = when(lowered.clone().str().contains_literal(lit("residential")))
            .then(lit("Residential"))
            .when(lowered.str().contains_literal(lit("commercial")))
            .then(lit("Commercial"))
            .otherwise(lit("Other"));
        let df = df
            .lazy()
            .with_column(category.alias(USAGE_CATEGORY))
            .collect()?;
        report.applied.push(USAGE_CATEGORY.to_string());
        Ok(df)
    }
}

impl Enricher for DefaultEnricher<'_> {
    #[instrument(skip_all, fields(rows = df.height()))]
    fn enrich(&self, df: &DataFrame) -> Result<EnrichedDataset> {
        info!("Starting data enrichment");
        let mut report = EnrichmentReport::default();

        let data = self.add_psf(df.clone(), &mut report)?;
        let data = self.add_area_tier(data, &mut report)?;
        let data = self.add_property_type(data, &mut report)?;
        let data = self.add_temporal_features(data, &mut report)?;
        let data = self.add_duration(data, &mut report)?;
        let data = self.add_luxury_flag(data, &mut report)?;
        let data = self.add_usage_category(data, &mut report)?;

        info!(
            "Enrichment complete. Added {} new columns ({} derivations skipped)",
            data.width() - df.width(),
            report.skipped.len()
        );
        Ok(EnrichedDataset { data, report })
    }
}

/// `amount / area` when both are present and positive, null otherwise.
pub fn price_per_sqft(amount: &str, area: &str) -> Expr {
    when(is_positive(amount).and(is_positive(area)))
        .then(col(amount).cast(DataType::Float64) / col(area).cast(DataType::Float64))
        .otherwise(lit(NULL).cast(DataType::Float64))
}

/// Season of a month number; a null month stays null.
pub fn season(month: Expr) -> Expr {
    when(month.clone().is_null())
        .then(lit(NULL).cast(DataType::String))
        .when(month.clone().eq(lit(12)).or(month.clone().lt_eq(lit(2))))
        .then(lit("Winter"))
        .when(month.clone().lt_eq(lit(5)))
        .then(lit("Spring"))
        .when(month.lt_eq(lit(8)))
        .then(lit("Summer"))
        .otherwise(lit("Fall"))
}

pub fn duration_category(days: Expr) -> Expr {
    when(days.clone().is_null())
        .then(lit(UNKNOWN_DURATION))
        .when(days.clone().lt(lit(SHORT_TERM_MAX_DAYS)))
        .then(lit(SHORT_TERM))
        .when(days.lt(lit(MEDIUM_TERM_MAX_DAYS)))
        .then(lit(MEDIUM_TERM))
        .otherwise(lit(LONG_TERM))
}

/// Percentile thresholds `(psf, rent)` over rows where both values are present.
///
/// `None` when no row qualifies.
pub fn luxury_thresholds(
    df: &DataFrame,
    psf: &str,
    amount: &str,
    metrics: &MarketMetrics,
) -> Result<Option<(f64, f64)>> {
    let valid = df
        .clone()
        .lazy()
        .filter(col(psf).is_not_null().and(col(amount).is_not_null()))
        .select([col(psf), col(amount)])
        .collect()?;
    if valid.height() == 0 {
        return Ok(None);
    }

    let psf_q = quantiles(&valid, psf, &[metrics.luxury_psf_percentile / 100.0])?;
    let rent_q = quantiles(&valid, amount, &[metrics.luxury_rent_percentile / 100.0])?;
    match (psf_q.first().copied().flatten(), rent_q.first().copied().flatten()) {
        (Some(p), Some(r)) => Ok(Some((p, r))),
        _ => Ok(None),
    }
}

/// True iff psf or amount reaches its threshold; nulls count as false.
pub fn luxury_flag(psf: &str, amount: &str, psf_threshold: f64, rent_threshold: f64) -> Expr {
    when(
        col(psf)
            .gt_eq(lit(psf_threshold))
            .or(col(amount).gt_eq(lit(rent_threshold))),
    )
    .then(lit(true))
    .otherwise(lit(false))
}

/// Enrich with the given rules, discarding the report.
pub fn enrich_rent_contracts(df: &DataFrame, config: &MarketConfig) -> Result<DataFrame> {
    Ok(DefaultEnricher::new(config).enrich(df)?.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::coerce_types;

    fn frame(starts: &[&str], ends: &[&str]) -> DataFrame {
        let config = MarketConfig::default();
        let n = starts.len();
        let raw = df!(
            "contract_id" => (0..n).map(|i| format!("C{}", i)).collect::<Vec<_>>(),
            "contract_start_date" => starts,
            "contract_end_date" => ends,
        )
        .unwrap();
        coerce_types(raw.lazy(), &config.schema)
            .unwrap()
            .collect()
            .unwrap()
    }

    #[test]
    fn duration_boundaries() {
        let config = MarketConfig::default();
        // 179, 180, 364 and 365 days after 01-01-2023
        let df = frame(
            &["01-01-2023", "01-01-2023", "01-01-2023", "01-01-2023", "01-01-2023"],
            &["29-06-2023", "30-06-2023", "31-12-2023", "01-01-2024", "bad"],
        );
        let out = enrich_rent_contracts(&df, &config).unwrap();

        let days = out.column(CONTRACT_DURATION_DAYS).unwrap().i64().unwrap();
        assert_eq!(
            days.into_iter().collect::<Vec<_>>(),
            vec![Some(179), Some(180), Some(364), Some(365), None]
        );
        let categories = out.column(CONTRACT_DURATION_CATEGORY).unwrap();
        let categories: Vec<_> = categories.str().unwrap().into_iter().collect();
        assert_eq!(
            categories,
            vec![
                Some("Short-term"),
                Some("Medium-term"),
                Some("Medium-term"),
                Some("Long-term"),
                Some("Unknown"),
            ]
        );
    }

    #[test]
    fn temporal_features_from_start_date() {
        let config = MarketConfig::default();
        // Sunday, Wednesday, Monday
        let df = frame(
            &["31-12-2023", "15-05-2024", "05-08-2024", "21-10-2024"],
            &["31-12-2024", "15-05-2025", "05-08-2025", "21-10-2025"],
        );
        let out = enrich_rent_contracts(&df, &config).unwrap();

        let weekdays: Vec<_> = out
            .column(CONTRACT_WEEKDAY)
            .unwrap()
            .cast(&DataType::Int32)
            .unwrap()
            .i32()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(weekdays, vec![Some(7), Some(3), Some(1), Some(1)]);

        let seasons = out.column(CONTRACT_SEASON).unwrap();
        let seasons: Vec<_> = seasons.str().unwrap().into_iter().collect();
        assert_eq!(
            seasons,
            vec![Some("Winter"), Some("Spring"), Some("Summer"), Some("Fall")]
        );
    }

    #[test]
    fn psf_is_null_unless_both_values_positive() {
        let config = MarketConfig::default();
        let df = df!(
            "annual_amount" => [Some(120_000.0), Some(0.0), None, Some(50_000.0)],
            "actual_area" => [Some(1_000.0), Some(900.0), Some(900.0), Some(-3.0)],
        )
        .unwrap();
        let out = enrich_rent_contracts(&df, &config).unwrap();
        let psf: Vec<_> = out
            .column(PRICE_PER_SQFT)
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(psf, vec![Some(120.0), None, None, None]);
    }

    #[test]
    fn luxury_is_false_when_no_row_qualifies() {
        let config = MarketConfig::default();
        let df = df!(
            "annual_amount" => [Some(100_000.0), None],
            "actual_area" => [Some(-1.0), Some(1_000.0)],
        )
        .unwrap();
        let out = enrich_rent_contracts(&df, &config).unwrap();
        let flags: Vec<_> = out.column(IS_LUXURY).unwrap().bool().unwrap().into_iter().collect();
        assert_eq!(flags, vec![Some(false), Some(false)]);
    }

    #[test]
    fn luxury_uses_either_threshold() {
        let config = MarketConfig::default();
        let df = df!(
            "annual_amount" => [50_000.0, 60_000.0, 70_000.0, 80_000.0, 400_000.0],
            "actual_area" => [1_000.0, 1_000.0, 200.0, 1_000.0, 10_000.0],
        )
        .unwrap();
        let out = enrich_rent_contracts(&df, &config).unwrap();
        let flags: Vec<_> = out.column(IS_LUXURY).unwrap().bool().unwrap().into_iter().collect();
        // Nearest-rank thresholds land on psf 80 and rent 80k
        assert_eq!(
            flags,
            vec![Some(false), Some(false), Some(true), Some(true), Some(true)]
        );
    }

    #[test]
    fn lookups_and_usage_category() {
        let config = MarketConfig::default();
        let df = df!(
            "area_name_en" => [Some("Dubai Marina"), Some("Somewhere New"), None],
            "ejari_property_type_en" => [Some(" FLAT"), Some(""), None],
            "property_usage_en" => [Some("Residential - Villa"), Some("COMMERCIAL"), None],
        )
        .unwrap();
        let out = enrich_rent_contracts(&df, &config).unwrap();

        let tiers: Vec<_> = out.column(AREA_TIER).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(tiers, vec![Some("Premium"), Some("Mid-Tier"), Some("Mid-Tier")]);

        let types: Vec<_> = out
            .column(PROPERTY_TYPE_NORMALIZED)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(types, vec![Some("Apartment"), Some("Unknown"), None]);

        let usage: Vec<_> = out
            .column(USAGE_CATEGORY)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(usage, vec![Some("Residential"), Some("Commercial"), Some("Other")]);
    }

    #[test]
    fn absent_columns_are_skipped_not_errors() {
        let config = MarketConfig::default();
        let df = df!("annual_amount" => [90_000.0]).unwrap();
        let enriched = DefaultEnricher::new(&config).enrich(&df).unwrap();

        assert!(enriched.report.applied.is_empty());
        assert_eq!(enriched.data.width(), 1);
        let skipped: Vec<_> = enriched
            .report
            .skipped
            .iter()
            .map(|s| s.derivation.as_str())
            .collect();
        assert_eq!(
            skipped,
            vec![
                PRICE_PER_SQFT,
                AREA_TIER,
                PROPERTY_TYPE_NORMALIZED,
                CONTRACT_SEASON,
                CONTRACT_DURATION_DAYS,
                IS_LUXURY,
                USAGE_CATEGORY,
            ]
        );
        assert_eq!(enriched.report.skipped[0].reason, "missing columns: actual_area");
    }
}
