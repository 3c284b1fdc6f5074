pub mod parquet_out;
pub mod processing;
pub mod reports;
pub mod transform;
