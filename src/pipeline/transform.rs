use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::config::MarketConfig;
use crate::dataset::{has_column, scalar_f64, scan_rent_contracts};
use crate::error::Result;
use crate::metrics::EtlMetrics;
use crate::pipeline::parquet_out::sink_parquet;
use crate::pipeline::processing::quality_gate::{validate_rent_contracts, ValidationSummary};

/// Outcome of one transform run
#[derive(Debug, Clone)]
pub struct TransformReport {
    pub rows_written: usize,
    pub bytes_written: u64,
    /// Summary of the sample validation, when validation ran
    pub validation: Option<ValidationSummary>,
}

/// Raw CSV export to Parquet, validating a head sample on the way.
pub struct RentContractsTransformer<'a> {
    input: PathBuf,
    output: PathBuf,
    validate: bool,
    config: &'a MarketConfig,
}

impl<'a> RentContractsTransformer<'a> {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        validate: bool,
        config: &'a MarketConfig,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            validate,
            config,
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Read, optionally validate a sample, then write Parquet. Any failure aborts the run.
    ///
    /// Validation findings are logged, never fatal.
    #[instrument(skip(self), fields(input = %self.input.display(), output = %self.output.display()))]
    pub fn transform(&self) -> Result<TransformReport> {
        let started = Instant::now();
        let result = self.run();
        match &result {
            Ok(report) => EtlMetrics::record_run_success(
                report.rows_written,
                report.bytes_written,
                started.elapsed().as_secs_f64(),
            ),
            Err(_) => EtlMetrics::record_run_error(),
        }
        result
    }

    fn run(&self) -> Result<TransformReport> {
        info!(
            "Starting transformation: {} -> {}",
            self.input.display(),
            self.output.display()
        );
        let lf = scan_rent_contracts(&self.input, &self.config.schema)?;

        let validation = if self.validate {
            let sample_size = self.config.files.validation_sample_size;
            info!("Collecting sample of {} rows for validation", sample_size);
            let sample = lf.clone().limit(sample_size as IdxSize).collect()?;

            info!("Running data validation on sample ({} records)", sample.height());
            let result = validate_rent_contracts(&sample, self.config, false)?;
            let summary = result.summary();
            info!("Validation summary (sample): {:?}", summary);
            EtlMetrics::record_validation(summary.errors, summary.warnings);

            if !result.errors.is_empty() {
                warn!("Validation errors found in sample:");
                for error in result.errors.iter().take(10) {
                    warn!("  - {}", error);
                }
            }
            log_statistics(&sample, self.config)?;
            Some(summary)
        } else {
            None
        };

        let (rows_written, bytes_written) = sink_parquet(lf, &self.output, &self.config.files)?;
        info!("Successfully transformed data to {}", self.output.display());

        Ok(TransformReport {
            rows_written,
            bytes_written,
            validation,
        })
    }
}

/// Log row counts, the rent range and the five most common usages.
pub fn log_statistics(df: &DataFrame, config: &MarketConfig) -> Result<()> {
    let schema = &config.schema;
    info!("=== Transformation Statistics ===");
    info!("Total records: {}", df.height());
    info!("Total columns: {}", df.width());

    let amount = schema.amount.as_str();
    if has_column(df, amount) {
        let nulls = df.column(amount)?.null_count();
        info!("Records with null rent: {}", nulls);

        if nulls < df.height() {
            let min = scalar_f64(df, col(amount).min())?.unwrap_or_default();
            let max = scalar_f64(df, col(amount).max())?.unwrap_or_default();
            let mean = scalar_f64(df, col(amount).mean())?.unwrap_or_default();
            let median = scalar_f64(df, col(amount).median())?.unwrap_or_default();
            info!("Rent range: AED {:.0} - {:.0}", min, max);
            info!("Average rent: AED {:.0}", mean);
            info!("Median rent: AED {:.0}", median);
        }
    }

    let usage = schema.usage.as_str();
    if has_column(df, usage) {
        let top = df
            .clone()
            .lazy()
            .group_by([col(usage)])
            .agg([len().cast(DataType::Int64).alias("count")])
            .sort(
                ["count", usage],
                SortMultipleOptions::default().with_order_descending_multi([true, false]),
            )
            .limit(5)
            .collect()?;

        info!("Top 5 property usage types:");
        let labels = top.column(usage)?.cast(&DataType::String)?;
        let labels = labels.str()?;
        let counts = top.column("count")?.i64()?;
        for (label, count) in labels.into_iter().zip(counts.into_iter()) {
            info!("  {}: {} records", label.unwrap_or("null"), count.unwrap_or(0));
        }
    }
    info!("=================================");
    Ok(())
}
