//! Delimited text reports.
//!
//! Every report carries a `report_date` column stamped when the report is built
//! and is written through a temporary sibling file.

use chrono::{Local, NaiveDate};
use polars::prelude::*;
use std::io::Write;
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::config::MarketConfig;
use crate::constants::*;
use crate::dataset::{cell_f64, has_column, is_positive, load_dataset};
use crate::error::{MarketError, Result};
use crate::pipeline::parquet_out::write_atomically;
use crate::pipeline::processing::analytics::{AnalysisOutcome, MarketSummary};

pub const AVG_AREA_SQFT: &str = "avg_area_sqft";
pub const MEDIAN_AREA_SQFT: &str = "median_area_sqft";
pub const CURRENT_CONTRACTS: &str = "current_contracts";
pub const PREVIOUS_CONTRACTS: &str = "previous_contracts";
pub const CURRENT_AVG_RENT: &str = "current_avg_rent";
pub const PREVIOUS_AVG_RENT: &str = "previous_avg_rent";
pub const CONTRACT_CHANGE_PCT: &str = "contract_change_pct";
pub const RENT_CHANGE_PCT: &str = "rent_change_pct";

/// `report_date` literal for the given day.
fn report_date(date: NaiveDate) -> Expr {
    lit(date).alias(REPORT_DATE)
}

/// Write `df` as CSV with a header row.
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    write_atomically(path, |file| {
        CsvWriter::new(file).include_header(true).finish(df)?;
        Ok(())
    })?;
    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

/// Property usage report and period comparison
pub struct PropertyUsageReport<'a> {
    config: &'a MarketConfig,
    report_date: NaiveDate,
}

impl<'a> PropertyUsageReport<'a> {
    /// Reports dated today (local time).
    pub fn new(config: &'a MarketConfig) -> Self {
        Self {
            config,
            report_date: Local::now().date_naive(),
        }
    }

    pub fn with_report_date(mut self, report_date: NaiveDate) -> Self {
        self.report_date = report_date;
        self
    }

    /// Rows with a usage and a positive rent.
    fn priced(&self, df: &DataFrame) -> Result<LazyFrame> {
        let schema = &self.config.schema;
        let missing: Vec<String> = [schema.usage.as_str(), schema.amount.as_str()]
            .into_iter()
            .filter(|c| !has_column(df, c))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(MarketError::MissingColumns(missing));
        }
        Ok(df
            .clone()
            .lazy()
            .filter(col(schema.usage.as_str()).is_not_null().and(is_positive(&schema.amount))))
    }

    /// Per-usage rent statistics, with area and price per sqft joined in when area is known.
    #[instrument(skip_all, fields(rows = df.height()))]
    pub fn usage_statistics(&self, df: &DataFrame) -> Result<DataFrame> {
        let schema = &self.config.schema;
        let (usage, amount, area) = (
            schema.usage.as_str(),
            schema.amount.as_str(),
            schema.area.as_str(),
        );

        let mut stats = self
            .priced(df)?
            .group_by([col(usage)])
            .agg([
                len().cast(DataType::Int64).alias(CONTRACT_COUNT),
                col(amount).mean().alias(AVG_RENT),
                col(amount).median().alias(MEDIAN_RENT),
                col(amount).min().alias(MIN_RENT),
                col(amount).max().alias(MAX_RENT),
                col(amount).std(1).alias(STD_RENT),
            ])
            .with_column(
                (col(CONTRACT_COUNT).cast(DataType::Float64)
                    / col(CONTRACT_COUNT).sum().cast(DataType::Float64)
                    * lit(100.0))
                .alias(MARKET_SHARE_PCT),
            );

        if has_column(df, area) {
            let sizes = df
                .clone()
                .lazy()
                .filter(col(usage).is_not_null().and(is_positive(area)))
                .group_by([col(usage)])
                .agg([
                    col(area).mean().alias(AVG_AREA_SQFT),
                    col(area).median().alias(MEDIAN_AREA_SQFT),
                ]);
            let psf = self
                .priced(df)?
                .filter(is_positive(area))
                .with_column(
                    (col(amount).cast(DataType::Float64) / col(area).cast(DataType::Float64))
                        .alias(PSF),
                )
                .group_by([col(usage)])
                .agg([
                    col(PSF).mean().alias(AVG_PSF),
                    col(PSF).median().alias(MEDIAN_PSF),
                ]);
            stats = stats
                .join(sizes, [col(usage)], [col(usage)], JoinArgs::new(JoinType::Left))
                .join(psf, [col(usage)], [col(usage)], JoinArgs::new(JoinType::Left));
        }

        Ok(stats
            .with_column(report_date(self.report_date))
            .sort(
                [CONTRACT_COUNT, usage],
                SortMultipleOptions::default().with_order_descending_multi([true, false]),
            )
            .collect()?)
    }

    /// Load `input`, build the usage report and write it to `output`.
    #[instrument(skip(self))]
    pub fn transform(&self, input: &Path, output: &Path) -> Result<DataFrame> {
        info!("Analyzing property usage from {}", input.display());
        let df = load_dataset(input, &self.config.schema)?;
        let mut report = self.usage_statistics(&df)?;
        write_csv(&mut report, output)?;

        info!("Property usage report saved to {}", output.display());
        let usage = report.column(&self.config.schema.usage)?.cast(&DataType::String)?;
        let usage = usage.str()?;
        for row in 0..report.height().min(5) {
            info!(
                "  {}: {} contracts ({:.1}%), avg rent: AED {:.0}",
                usage.get(row).unwrap_or("null"),
                cell_f64(&report, CONTRACT_COUNT, row)?.unwrap_or_default(),
                cell_f64(&report, MARKET_SHARE_PCT, row)?.unwrap_or_default(),
                cell_f64(&report, AVG_RENT, row)?.unwrap_or_default()
            );
        }
        Ok(report)
    }

    fn period_totals(&self, df: &DataFrame, count: &str, avg: &str) -> Result<LazyFrame> {
        let schema = &self.config.schema;
        Ok(self.priced(df)?.group_by([col(schema.usage.as_str())]).agg([
            len().cast(DataType::Int64).alias(count),
            col(schema.amount.as_str()).mean().alias(avg),
        ]))
    }

    /// Usage counts and average rent of two periods side by side, with percentage changes.
    ///
    /// Usages present in only one period keep null figures for the other.
    #[instrument(skip_all)]
    pub fn comparison(&self, current: &DataFrame, previous: &DataFrame) -> Result<DataFrame> {
        let usage = self.config.schema.usage.as_str();
        let current = self.period_totals(current, CURRENT_CONTRACTS, CURRENT_AVG_RENT)?;
        let previous = self.period_totals(previous, PREVIOUS_CONTRACTS, PREVIOUS_AVG_RENT)?;

        let change = |now: &str, before: &str| {
            (col(now).cast(DataType::Float64) - col(before).cast(DataType::Float64))
                / col(before).cast(DataType::Float64)
                * lit(100.0)
        };

        Ok(current
            .join(
                previous,
                [col(usage)],
                [col(usage)],
                JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
            )
            .with_columns([
                change(CURRENT_CONTRACTS, PREVIOUS_CONTRACTS).alias(CONTRACT_CHANGE_PCT),
                change(CURRENT_AVG_RENT, PREVIOUS_AVG_RENT).alias(RENT_CHANGE_PCT),
                report_date(self.report_date),
            ])
            .sort(
                [CURRENT_CONTRACTS, usage],
                SortMultipleOptions::default()
                    .with_order_descending_multi([true, false])
                    .with_nulls_last(true),
            )
            .collect()?)
    }

    /// Load both periods, compare them and write the result to `output`.
    #[instrument(skip(self))]
    pub fn compare_periods(&self, current: &Path, previous: &Path, output: &Path) -> Result<DataFrame> {
        info!("Comparing property usage across periods");
        let current = load_dataset(current, &self.config.schema)?;
        let previous = load_dataset(previous, &self.config.schema)?;
        let mut comparison = self.comparison(&current, &previous)?;
        write_csv(&mut comparison, output)?;
        info!("Period comparison saved to {}", output.display());
        Ok(comparison)
    }

    /// Write an analysis table with a `report_date` column.
    ///
    /// Returns false, writing nothing, when the outcome has no rows.
    pub fn export_outcome(&self, name: &str, outcome: &AnalysisOutcome, output: &Path) -> Result<bool> {
        match outcome {
            AnalysisOutcome::Rows(df) => {
                let mut stamped = df
                    .clone()
                    .lazy()
                    .with_column(report_date(self.report_date))
                    .collect()?;
                write_csv(&mut stamped, output)?;
                Ok(true)
            }
            AnalysisOutcome::Empty { reason } => {
                warn!("Skipping {} export: {}", name, reason);
                Ok(false)
            }
            AnalysisOutcome::NotApplicable { missing_columns } => {
                warn!(
                    "Skipping {} export, missing columns: {}",
                    name,
                    missing_columns.join(", ")
                );
                Ok(false)
            }
        }
    }

    /// Write the market summary as `metric,value,report_date` rows.
    pub fn export_summary(&self, summary: &MarketSummary, output: &Path) -> Result<()> {
        let (metrics, values): (Vec<String>, Vec<f64>) = summary.metrics().into_iter().unzip();
        let mut df = DataFrame::new(vec![
            Column::new("metric".into(), metrics),
            Column::new("value".into(), values),
        ])?
        .lazy()
        .with_column(report_date(self.report_date))
        .collect()?;
        write_csv(&mut df, output)
    }

    /// Write the market summary as pretty JSON.
    pub fn export_summary_json(&self, summary: &MarketSummary, output: &Path) -> Result<()> {
        let json = summary.to_json()?;
        write_atomically(output, |file| {
            file.write_all(json.as_bytes())?;
            Ok(())
        })?;
        info!("Wrote market summary to {}", output.display());
        Ok(())
    }
}
