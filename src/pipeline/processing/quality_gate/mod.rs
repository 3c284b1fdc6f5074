use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, instrument};

use crate::config::MarketConfig;
use crate::dataset::{
    column_dtype, count_where, epoch_days, has_column, is_numeric, is_temporal, percentage,
    quantiles,
};
use crate::error::Result;

/// Severity of a single validation finding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational, nothing to act on
    Info,
    /// Notable issue worth flagging
    Warning,
    /// Makes the dataset invalid
    Error,
}

/// Findings of one validation run.
///
/// Messages are only ever appended; the dataset is valid iff no error was recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
}

/// Counts of a [`ValidationResult`], suitable for logging.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ValidationSummary {
    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
    pub is_valid: bool,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => self.info.push(message),
            Severity::Warning => self.warnings.push(message),
            Severity::Error => self.errors.push(message),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message);
    }

    pub fn add_info(&mut self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn summary(&self) -> ValidationSummary {
        ValidationSummary {
            errors: self.errors.len(),
            warnings: self.warnings.len(),
            info: self.info.len(),
            is_valid: self.is_valid(),
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() && self.warnings.is_empty() && self.info.is_empty() {
            return write!(f, "All validations passed");
        }
        let sections = [
            ("Errors", &self.errors),
            ("Warnings", &self.warnings),
            ("Info", &self.info),
        ];
        let mut first = true;
        for (title, messages) in sections {
            if messages.is_empty() {
                continue;
            }
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{} ({}):", title, messages.len())?;
            for message in messages.iter() {
                write!(f, "\n  - {}", message)?;
            }
        }
        Ok(())
    }
}

/// Lower and upper fences for IQR outlier detection.
pub fn iqr_bounds(q1: f64, q3: f64, multiplier: f64) -> (f64, f64) {
    let iqr = q3 - q1;
    (q1 - multiplier * iqr, q3 + multiplier * iqr)
}

/// Trait for dataset-level quality checks
pub trait QualityGate {
    /// Run every check against `df` and collect the findings
    fn validate(&self, df: &DataFrame) -> Result<ValidationResult>;
}

/// Validator for rent contract datasets.
///
/// `strict` only changes the severity of null required fields (error instead of
/// warning); every other check keeps its fixed severity.
pub struct RentContractValidator<'a> {
    config: &'a MarketConfig,
    strict: bool,
}

impl<'a> RentContractValidator<'a> {
    pub fn new(config: &'a MarketConfig, strict: bool) -> Self {
        Self { config, strict }
    }

    fn check_schema(&self, df: &DataFrame, result: &mut ValidationResult) {
        let missing: Vec<&str> = self
            .config
            .quality_rules
            .required_fields
            .iter()
            .map(String::as_str)
            .filter(|field| !has_column(df, field))
            .collect();

        if !missing.is_empty() {
            result.add_error(format!("Missing required columns: {}", missing.join(", ")));
        }
    }

    fn check_required_nulls(&self, df: &DataFrame, result: &mut ValidationResult) -> Result<()> {
        let severity = if self.strict {
            Severity::Error
        } else {
            Severity::Warning
        };
        for field in &self.config.quality_rules.required_fields {
            if !has_column(df, field) {
                continue;
            }
            let nulls = df.column(field)?.null_count();
            if nulls > 0 {
                result.push(
                    severity,
                    format!(
                        "Field '{}' has {} null values ({:.2}%)",
                        field,
                        nulls,
                        percentage(nulls, df.height())
                    ),
                );
            }
        }
        Ok(())
    }

    fn check_types(&self, df: &DataFrame, result: &mut ValidationResult) {
        for field in &self.config.quality_rules.numeric_fields {
            if let Some(dtype) = column_dtype(df, field) {
                if !is_numeric(&dtype) {
                    result.add_warning(format!("Field '{}' is not numeric type: {}", field, dtype));
                }
            }
        }
    }

    /// Shared by the rent and size checks: non-positive values are errors,
    /// values outside `[min, max]` are warnings relative to the non-null subset.
    fn check_range(
        &self,
        df: &DataFrame,
        column: &str,
        label: &str,
        (min, max): (f64, f64),
        unit: (&str, &str),
        result: &mut ValidationResult,
    ) -> Result<()> {
        match column_dtype(df, column) {
            Some(dtype) if is_numeric(&dtype) => {}
            _ => return Ok(()),
        }

        let non_null = df.height() - df.column(column)?.null_count();
        if non_null == 0 {
            return Ok(());
        }

        let (prefix, suffix) = unit;
        let non_positive = count_where(df, col(column).lt_eq(lit(0.0)))?;
        if non_positive > 0 {
            result.add_error(format!("Found {} records with {} <= 0", non_positive, label));
        }

        let below = count_where(df, col(column).lt(lit(min)))?;
        if below > 0 {
            result.add_warning(format!(
                "Found {} records with {} < {}{}{} ({:.2}%)",
                below,
                label,
                prefix,
                min,
                suffix,
                percentage(below, non_null)
            ));
        }

        let above = count_where(df, col(column).gt(lit(max)))?;
        if above > 0 {
            result.add_warning(format!(
                "Found {} records with {} > {}{}{} ({:.2}%)",
                above,
                label,
                prefix,
                max,
                suffix,
                percentage(above, non_null)
            ));
        }
        Ok(())
    }

    fn check_date_nulls(&self, df: &DataFrame, result: &mut ValidationResult) -> Result<()> {
        for field in &self.config.quality_rules.date_fields {
            if !has_column(df, field) {
                continue;
            }
            let nulls = df.column(field)?.null_count();
            if nulls > 0 {
                result.add_warning(format!(
                    "Field '{}' has {} null dates ({:.2}%)",
                    field,
                    nulls,
                    percentage(nulls, df.height())
                ));
            }
        }
        Ok(())
    }

    /// End must follow start, and the contract length must be plausible.
    fn check_contract_dates(&self, df: &DataFrame, result: &mut ValidationResult) -> Result<()> {
        let schema = &self.config.schema;
        let (start, end) = (schema.start_date.as_str(), schema.end_date.as_str());
        let both_temporal = [start, end]
            .iter()
            .all(|c| column_dtype(df, c).map_or(false, |d| is_temporal(&d)));
        if !both_temporal {
            return Ok(());
        }

        let both_present = col(start).is_not_null().and(col(end).is_not_null());

        let inverted = count_where(
            df,
            both_present.clone().and(epoch_days(end).lt_eq(epoch_days(start))),
        )?;
        if inverted > 0 {
            result.add_error(format!(
                "Found {} records where end_date <= start_date",
                inverted
            ));
        }

        let duration = epoch_days(end) - epoch_days(start);
        let thresholds = &self.config.validation;

        let too_short = count_where(
            df,
            both_present
                .clone()
                .and(duration.clone().lt(lit(thresholds.min_contract_days))),
        )?;
        if too_short > 0 {
            result.add_warning(format!(
                "Found {} contracts shorter than {} days",
                too_short, thresholds.min_contract_days
            ));
        }

        let too_long = count_where(
            df,
            both_present.and(duration.gt(lit(thresholds.max_contract_days))),
        )?;
        if too_long > 0 {
            result.add_warning(format!(
                "Found {} contracts longer than {} days",
                too_long, thresholds.max_contract_days
            ));
        }
        Ok(())
    }

    fn check_outliers(&self, df: &DataFrame, result: &mut ValidationResult) -> Result<()> {
        let amount = self.config.schema.amount.as_str();
        match column_dtype(df, amount) {
            Some(dtype) if is_numeric(&dtype) => {}
            _ => return Ok(()),
        }

        let positive = df
            .clone()
            .lazy()
            .filter(col(amount).is_not_null().and(col(amount).gt(lit(0.0))))
            .collect()?;
        if positive.height() < self.config.metrics.outlier_min_sample_size {
            return Ok(());
        }

        let (q1, q3) = match quantiles(&positive, amount, &[0.25, 0.75])?.as_slice() {
            [Some(q1), Some(q3)] => (*q1, *q3),
            _ => return Ok(()),
        };
        let (lower, upper) = iqr_bounds(q1, q3, self.config.metrics.outlier_iqr_multiplier);

        let outliers = count_where(
            &positive,
            col(amount).lt(lit(lower)).or(col(amount).gt(lit(upper))),
        )?;
        if outliers > 0 {
            result.add_info(format!(
                "Detected {} statistical outliers in rent amounts ({:.2}%)",
                outliers,
                percentage(outliers, positive.height())
            ));
        }
        Ok(())
    }
}

impl QualityGate for RentContractValidator<'_> {
    #[instrument(skip_all, fields(rows = df.height(), strict = self.strict))]
    fn validate(&self, df: &DataFrame) -> Result<ValidationResult> {
        let mut result = ValidationResult::new();

        if df.height() == 0 {
            result.add_error("DataFrame is empty");
            return Ok(result);
        }
        result.add_info(format!("Validating {} records", df.height()));

        let schema = &self.config.schema;
        let thresholds = &self.config.validation;

        self.check_schema(df, &mut result);
        self.check_required_nulls(df, &mut result)?;
        self.check_types(df, &mut result);
        self.check_range(
            df,
            &schema.amount,
            "rent",
            (thresholds.min_annual_rent, thresholds.max_annual_rent),
            ("AED ", ""),
            &mut result,
        )?;
        self.check_range(
            df,
            &schema.area,
            "size",
            (thresholds.min_property_size, thresholds.max_property_size),
            ("", " sqft"),
            &mut result,
        )?;
        self.check_date_nulls(df, &mut result)?;
        self.check_contract_dates(df, &mut result)?;
        self.check_outliers(df, &mut result)?;

        info!("Validation complete: {:?}", result.summary());
        Ok(result)
    }
}

/// Validate with the given rules; `strict` escalates null required fields to errors.
pub fn validate_rent_contracts(
    df: &DataFrame,
    config: &MarketConfig,
    strict: bool,
) -> Result<ValidationResult> {
    RentContractValidator::new(config, strict).validate(df)
}
