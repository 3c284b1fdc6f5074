/// Column names produced by enrichment and analytics.
/// Source column names are configurable (see `config::SchemaConfig`); these are not.

pub const PRICE_PER_SQFT: &str = "price_per_sqft";
pub const AREA_TIER: &str = "area_tier";
pub const PROPERTY_TYPE_NORMALIZED: &str = "property_type_normalized";
pub const CONTRACT_YEAR: &str = "contract_year";
pub const CONTRACT_QUARTER: &str = "contract_quarter";
pub const CONTRACT_MONTH: &str = "contract_month";
pub const CONTRACT_WEEKDAY: &str = "contract_weekday";
pub const CONTRACT_SEASON: &str = "contract_season";
pub const CONTRACT_DURATION_DAYS: &str = "contract_duration_days";
pub const CONTRACT_DURATION_CATEGORY: &str = "contract_duration_category";
pub const IS_LUXURY: &str = "is_luxury";
pub const USAGE_CATEGORY: &str = "usage_category";

// Analytics output
pub const PSF: &str = "psf";
pub const CONTRACT_COUNT: &str = "contract_count";
pub const AVG_RENT: &str = "avg_rent";
pub const MEDIAN_RENT: &str = "median_rent";
pub const MIN_RENT: &str = "min_rent";
pub const MAX_RENT: &str = "max_rent";
pub const STD_RENT: &str = "std_rent";
pub const AVG_PSF: &str = "avg_psf";
pub const MEDIAN_PSF: &str = "median_psf";
pub const AVG_AREA: &str = "avg_area";
pub const MARKET_SHARE_PCT: &str = "market_share_pct";
pub const PERIOD: &str = "period";
pub const REPORT_DATE: &str = "report_date";

/// Duration categories, shortest first.
pub const SHORT_TERM: &str = "Short-term";
pub const MEDIUM_TERM: &str = "Medium-term";
pub const LONG_TERM: &str = "Long-term";
pub const UNKNOWN_DURATION: &str = "Unknown";

pub const SHORT_TERM_MAX_DAYS: i64 = 180;
pub const MEDIUM_TERM_MAX_DAYS: i64 = 365;
