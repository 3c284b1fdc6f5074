//! Market analytics over a contract dataset.
//!
//! [`MarketAnalytics`] borrows a dataset and the market rules and answers
//! grouped questions about it: price per square foot, area and property type
//! breakdowns, usage segments, luxury share, rental trends and an overall
//! summary. Every operation is read-only; a missing optional column yields
//! [`AnalysisOutcome::NotApplicable`] and a filter that leaves nothing yields
//! [`AnalysisOutcome::Empty`].

mod segments;
mod summary;
mod trends;

pub use summary::{MarketSummary, PsfStatistics, RentStatistics, UsageShare};
pub use trends::TrendPeriod;

use polars::prelude::*;
use tracing::{info, instrument, warn};

use crate::config::MarketConfig;
use crate::constants::*;
use crate::dataset::{is_positive, missing_columns};
use crate::error::{MarketError, Result};

/// Result of one analysis
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// At least one result row
    Rows(DataFrame),
    /// The analysis ran but no row qualified
    Empty { reason: String },
    /// The dataset lacks columns the analysis needs
    NotApplicable { missing_columns: Vec<String> },
}

impl AnalysisOutcome {
    /// Wrap a frame, mapping zero rows to [`AnalysisOutcome::Empty`].
    pub fn from_frame(df: DataFrame, empty_reason: impl Into<String>) -> Self {
        if df.height() == 0 {
            AnalysisOutcome::Empty {
                reason: empty_reason.into(),
            }
        } else {
            AnalysisOutcome::Rows(df)
        }
    }

    pub fn rows(&self) -> Option<&DataFrame> {
        match self {
            AnalysisOutcome::Rows(df) => Some(df),
            _ => None,
        }
    }

    pub fn into_rows(self) -> Option<DataFrame> {
        match self {
            AnalysisOutcome::Rows(df) => Some(df),
            _ => None,
        }
    }

    pub fn height(&self) -> usize {
        self.rows().map_or(0, DataFrame::height)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, AnalysisOutcome::Empty { .. })
    }

    pub fn is_not_applicable(&self) -> bool {
        matches!(self, AnalysisOutcome::NotApplicable { .. })
    }
}

/// Analytics engine over one dataset
pub struct MarketAnalytics<'a> {
    data: &'a DataFrame,
    config: &'a MarketConfig,
}

impl<'a> MarketAnalytics<'a> {
    /// Fails with [`MarketError::MissingColumns`] when the amount or usage column is absent.
    pub fn new(data: &'a DataFrame, config: &'a MarketConfig) -> Result<Self> {
        let schema = &config.schema;
        let missing = missing_columns(data, &[schema.amount.as_str(), schema.usage.as_str()]);
        if !missing.is_empty() {
            return Err(MarketError::MissingColumns(missing));
        }
        Ok(Self { data, config })
    }

    pub fn data(&self) -> &DataFrame {
        self.data
    }

    pub fn config(&self) -> &MarketConfig {
        self.config
    }

    fn amount(&self) -> &str {
        &self.config.schema.amount
    }

    fn usage(&self) -> &str {
        &self.config.schema.usage
    }

    fn area(&self) -> &str {
        &self.config.schema.area
    }

    /// Capability check: `NotApplicable` naming the absent columns, if any.
    fn require(&self, columns: &[&str]) -> Option<AnalysisOutcome> {
        let missing = missing_columns(self.data, columns);
        if missing.is_empty() {
            None
        } else {
            Some(AnalysisOutcome::NotApplicable {
                missing_columns: missing,
            })
        }
    }

    /// Rows with a positive non-null amount.
    fn valid_rents(&self) -> LazyFrame {
        self.data.clone().lazy().filter(is_positive(self.amount()))
    }

    /// Contracts with a plausible price per square foot, with the ratio in a `psf` column.
    ///
    /// Only usages listed as residential or commercial survive, and only when
    /// their psf lies inside the bounds for that usage.
    #[instrument(skip_all)]
    pub fn calculate_psf_metrics(&self) -> Result<AnalysisOutcome> {
        info!("Calculating PSF metrics");
        if let Some(not_applicable) = self.require(&[self.area()]) {
            warn!("{} column not found, PSF metrics unavailable", self.area());
            return Ok(not_applicable);
        }

        let (amount, area, usage) = (self.amount(), self.area(), self.usage());
        let thresholds = &self.config.validation;
        let psf = col(PSF);

        let residential = usage_in(usage, &self.config.usage.residential).and(
            psf.clone()
                .gt_eq(lit(thresholds.min_psf_residential))
                .and(psf.clone().lt_eq(lit(thresholds.max_psf_residential))),
        );
        let commercial = usage_in(usage, &self.config.usage.commercial).and(
            psf.clone()
                .gt_eq(lit(thresholds.min_psf_commercial))
                .and(psf.lt_eq(lit(thresholds.max_psf_commercial))),
        );

        let df = self
            .data
            .clone()
            .lazy()
            .filter(is_positive(area).and(is_positive(amount)))
            .with_column(
                (col(amount).cast(DataType::Float64) / col(area).cast(DataType::Float64))
                    .alias(PSF),
            )
            .filter(residential.or(commercial))
            .collect()?;

        info!("PSF metrics calculated for {} contracts", df.height());
        Ok(AnalysisOutcome::from_frame(
            df,
            "no contract has a plausible price per sqft",
        ))
    }
}

/// Exact membership of `column` in `values`; an empty list matches nothing.
pub(crate) fn usage_in(column: &str, values: &[String]) -> Expr {
    values
        .iter()
        .map(|v| col(column).cast(DataType::String).eq(lit(v.as_str())))
        .reduce(|acc, e| acc.or(e))
        .unwrap_or_else(|| lit(false))
}

/// Count and rent statistics shared by every grouped breakdown.
pub(crate) fn rent_aggregates(amount: &str) -> Vec<Expr> {
    vec![
        len().cast(DataType::Int64).alias(CONTRACT_COUNT),
        col(amount).mean().alias(AVG_RENT),
        col(amount).median().alias(MEDIAN_RENT),
        col(amount).min().alias(MIN_RENT),
        col(amount).max().alias(MAX_RENT),
    ]
}

/// Share of each group's count in the total count of the frame.
pub(crate) fn market_share() -> Expr {
    (col(CONTRACT_COUNT).cast(DataType::Float64)
        / col(CONTRACT_COUNT).sum().cast(DataType::Float64)
        * lit(100.0))
    .alias(MARKET_SHARE_PCT)
}

/// Count descending, key ascending.
pub(crate) fn by_count_then_key(lf: LazyFrame, key: &str) -> LazyFrame {
    lf.sort(
        [CONTRACT_COUNT, key],
        SortMultipleOptions::default().with_order_descending_multi([true, false]),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Contracts frame with the default column names.
    pub fn contracts(
        areas: &[&str],
        usages: &[&str],
        amounts: &[f64],
        sizes: &[f64],
    ) -> DataFrame {
        df!(
            "contract_id" => (0..amounts.len()).map(|i| format!("C{}", i)).collect::<Vec<_>>(),
            "area_name_en" => areas,
            "property_usage_en" => usages,
            "annual_amount" => amounts,
            "actual_area" => sizes,
        )
        .unwrap()
    }

    pub fn f64s(df: &DataFrame, column: &str) -> Vec<Option<f64>> {
        df.column(column)
            .unwrap()
            .cast(&DataType::Float64)
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect()
    }

    pub fn strs(df: &DataFrame, column: &str) -> Vec<Option<String>> {
        df.column(column)
            .unwrap()
            .cast(&DataType::String)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }
}
