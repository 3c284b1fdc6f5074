//! Dataset loading and the small column/scalar helpers shared by every stage.

use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

use crate::config::SchemaConfig;
use crate::error::{MarketError, Result};

/// Marker strings treated as missing in the raw export.
pub const NULL_MARKERS: [&str; 3] = ["null", "NULL", ""];

/// Rows sampled to infer column types of the raw export.
pub const INFER_SCHEMA_ROWS: usize = 10_000;

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.schema().contains(name)
}

/// Columns from `required` that `df` lacks, in the order given.
pub fn missing_columns(df: &DataFrame, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !has_column(df, name))
        .map(|name| name.to_string())
        .collect()
}

pub fn column_dtype(df: &DataFrame, name: &str) -> Option<DataType> {
    df.schema().get(name).cloned()
}

pub fn is_numeric(dtype: &DataType) -> bool {
    dtype.is_integer() || dtype.is_float()
}

/// Number of rows for which `predicate` evaluates to true (nulls count as false).
pub fn count_where(df: &DataFrame, predicate: Expr) -> PolarsResult<usize> {
    let out = df
        .clone()
        .lazy()
        .filter(predicate)
        .select([len().cast(DataType::Int64).alias("n")])
        .collect()?;
    Ok(out.column("n")?.i64()?.get(0).unwrap_or(0) as usize)
}

/// Evaluate a single aggregate expression to an `f64`; `None` when the aggregate is null.
pub fn scalar_f64(df: &DataFrame, expr: Expr) -> PolarsResult<Option<f64>> {
    let out = df
        .clone()
        .lazy()
        .select([expr.cast(DataType::Float64).alias("value")])
        .collect()?;
    Ok(out.column("value")?.f64()?.get(0))
}

/// Read a single `f64` cell from an already aggregated frame.
pub fn cell_f64(df: &DataFrame, column: &str, row: usize) -> PolarsResult<Option<f64>> {
    let values = df.column(column)?.cast(&DataType::Float64)?;
    Ok(values.f64()?.get(row))
}

pub fn is_temporal(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Date | DataType::Datetime(_, _))
}

/// Whole days since the Unix epoch for a date or datetime column.
pub fn epoch_days(column: &str) -> Expr {
    col(column)
        .cast(DataType::Date)
        .cast(DataType::Int32)
        .cast(DataType::Int64)
}

/// Nearest-rank quantiles of `column`, one entry per requested fraction.
pub fn quantiles(df: &DataFrame, column: &str, fractions: &[f64]) -> PolarsResult<Vec<Option<f64>>> {
    let exprs: Vec<Expr> = fractions
        .iter()
        .enumerate()
        .map(|(i, q)| {
            col(column)
                .quantile(lit(*q), QuantileMethod::Nearest)
                .cast(DataType::Float64)
                .alias(format!("q{}", i))
        })
        .collect();
    let out = df.clone().lazy().select(exprs).collect()?;
    (0..fractions.len())
        .map(|i| Ok(out.column(&format!("q{}", i))?.f64()?.get(0)))
        .collect()
}

pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

pub fn is_positive(column: &str) -> Expr {
    col(column).is_not_null().and(col(column).gt(lit(0.0)))
}

/// Lazily scan the raw rent contract CSV.
///
/// Column types are inferred from the first rows. The amount and area columns are
/// then forced to `Float64`, the sub-type id to `Int64`, and the date columns parsed
/// with the configured format. Values that fail to convert become null instead of
/// aborting the scan.
pub fn scan_rent_contracts(path: &Path, schema: &SchemaConfig) -> Result<LazyFrame> {
    if !path.exists() {
        return Err(MarketError::InputNotFound(path.display().to_string()));
    }
    debug!("Scanning CSV {}", path.display());

    let lf = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
        .with_null_values(Some(NullValues::AllColumns(
            NULL_MARKERS.iter().map(|m| (*m).into()).collect(),
        )))
        .with_encoding(CsvEncoding::LossyUtf8)
        .with_ignore_errors(true)
        .finish()?;

    Ok(coerce_types(lf, schema)?)
}

/// Cast the measured columns to `Float64`, the sub-type id to `Int64` and parse text
/// date columns. Other columns keep their type and missing columns are left alone.
pub fn coerce_types(mut lf: LazyFrame, schema: &SchemaConfig) -> PolarsResult<LazyFrame> {
    let current = lf.collect_schema()?;
    let mut exprs = Vec::new();

    for name in [schema.amount.as_str(), schema.area.as_str()] {
        match current.get(name) {
            Some(dtype) if *dtype != DataType::Float64 => {
                exprs.push(col(name).cast(DataType::Float64));
            }
            _ => {}
        }
    }

    let sub_type_id = schema.property_sub_type_id.as_str();
    match current.get(sub_type_id) {
        Some(dtype) if *dtype != DataType::Int64 => {
            exprs.push(col(sub_type_id).cast(DataType::Int64));
        }
        _ => {}
    }

    for name in [schema.start_date.as_str(), schema.end_date.as_str()] {
        if current.get(name) == Some(&DataType::String) {
            exprs.push(col(name).str().to_date(StrptimeOptions {
                format: Some(schema.date_format.as_str().into()),
                strict: false,
                ..Default::default()
            }));
        }
    }

    if exprs.is_empty() {
        Ok(lf)
    } else {
        Ok(lf.with_columns(exprs))
    }
}

/// Load a dataset from Parquet or CSV, chosen by file extension.
pub fn load_dataset(path: &Path, schema: &SchemaConfig) -> Result<DataFrame> {
    if !path.exists() {
        return Err(MarketError::InputNotFound(path.display().to_string()));
    }

    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("parquet"))
        .unwrap_or(false);

    let df = if is_parquet {
        let file = File::open(path)?;
        let df = ParquetReader::new(file).finish()?;
        coerce_types(df.lazy(), schema)?.collect()?
    } else {
        scan_rent_contracts(path, schema)?.collect()?
    };

    info!(
        "Loaded {} rows x {} columns from {}",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}
