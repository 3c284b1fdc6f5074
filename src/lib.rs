pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;

// Layered boundaries for outbound IO
pub mod app;
pub mod infra;

pub use config::MarketConfig;
pub use error::{MarketError, Result};
pub use pipeline::processing::analytics::{AnalysisOutcome, MarketAnalytics, TrendPeriod};
pub use pipeline::processing::enrich::{DefaultEnricher, Enricher};
pub use pipeline::processing::quality_gate::{QualityGate, RentContractValidator, ValidationResult};
