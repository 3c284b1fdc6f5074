//! Market rules and runtime settings.
//!
//! Everything the validator, enricher and analytics engine consult lives in one
//! immutable [`MarketConfig`]. It is built once at start-up (defaults, optionally
//! overridden by a TOML file) and handed to each component by reference.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{MarketError, Result};

/// Environment variable consulted when no config path is given explicitly.
pub const CONFIG_ENV_VAR: &str = "RENT_MARKET_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub schema: SchemaConfig,
    pub validation: ValidationThresholds,
    pub metrics: MarketMetrics,
    pub quality_rules: DataQualityRules,
    pub area_tiers: AreaTierTable,
    pub property_type_aliases: PropertyTypeAliases,
    pub usage: UsageCategories,
    pub api: ApiConfig,
    pub files: FileConfig,
    pub reports: ReportConfig,
}

/// Source column names of the rent contract export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub contract_id: String,
    pub start_date: String,
    pub end_date: String,
    pub amount: String,
    pub area: String,
    pub usage: String,
    pub property_type: String,
    pub property_sub_type: String,
    pub property_sub_type_id: String,
    pub area_name: String,
    /// Format of the raw date strings.
    pub date_format: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            contract_id: "contract_id".to_string(),
            start_date: "contract_start_date".to_string(),
            end_date: "contract_end_date".to_string(),
            amount: "annual_amount".to_string(),
            area: "actual_area".to_string(),
            usage: "property_usage_en".to_string(),
            property_type: "ejari_property_type_en".to_string(),
            property_sub_type: "ejari_property_sub_type_en".to_string(),
            property_sub_type_id: "ejari_property_sub_type_id".to_string(),
            area_name: "area_name_en".to_string(),
            date_format: "%d-%m-%Y".to_string(),
        }
    }
}

/// Plausibility ranges (rent in AED per year, sizes in square feet).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationThresholds {
    pub min_annual_rent: f64,
    pub max_annual_rent: f64,
    pub min_property_size: f64,
    pub max_property_size: f64,
    pub min_psf_residential: f64,
    pub max_psf_residential: f64,
    pub min_psf_commercial: f64,
    pub max_psf_commercial: f64,
    pub min_contract_days: i64,
    pub max_contract_days: i64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            min_annual_rent: 10_000.0,
            max_annual_rent: 5_000_000.0,
            min_property_size: 200.0,
            max_property_size: 50_000.0,
            min_psf_residential: 20.0,
            max_psf_residential: 500.0,
            min_psf_commercial: 30.0,
            max_psf_commercial: 800.0,
            min_contract_days: 30,
            max_contract_days: 730,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketMetrics {
    /// Percentile (0-100) of price per sqft above which a contract counts as luxury.
    pub luxury_psf_percentile: f64,
    /// Percentile (0-100) of annual rent above which a contract counts as luxury.
    pub luxury_rent_percentile: f64,
    pub outlier_iqr_multiplier: f64,
    /// Fewer positive amounts than this and outlier detection stays silent.
    pub outlier_min_sample_size: usize,
    pub min_area_sample_size: usize,
}

impl Default for MarketMetrics {
    fn default() -> Self {
        Self {
            luxury_psf_percentile: 75.0,
            luxury_rent_percentile: 80.0,
            outlier_iqr_multiplier: 3.0,
            outlier_min_sample_size: 10,
            min_area_sample_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataQualityRules {
    pub required_fields: Vec<String>,
    pub numeric_fields: Vec<String>,
    pub date_fields: Vec<String>,
}

impl Default for DataQualityRules {
    fn default() -> Self {
        Self {
            required_fields: vec![
                "contract_id".to_string(),
                "contract_start_date".to_string(),
                "property_usage_en".to_string(),
                "annual_amount".to_string(),
            ],
            numeric_fields: vec![
                "annual_amount".to_string(),
                "contract_amount".to_string(),
                "no_of_prop".to_string(),
            ],
            date_fields: vec![
                "contract_start_date".to_string(),
                "contract_end_date".to_string(),
            ],
        }
    }
}

/// Market tier of a community.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AreaTier {
    Premium,
    #[default]
    #[serde(rename = "Mid-Tier")]
    MidTier,
    Budget,
    Emerging,
}

impl AreaTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AreaTier::Premium => "Premium",
            AreaTier::MidTier => "Mid-Tier",
            AreaTier::Budget => "Budget",
            AreaTier::Emerging => "Emerging",
        }
    }
}

impl std::fmt::Display for AreaTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Community name to tier. Entries from a config file are merged over the built-in table.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct AreaTierTable(pub BTreeMap<String, AreaTier>);

impl<'de> Deserialize<'de> for AreaTierTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let overrides = BTreeMap::<String, AreaTier>::deserialize(deserializer)?;
        let mut table = Self::default();
        table.0.extend(overrides);
        Ok(table)
    }
}

impl Default for AreaTierTable {
    fn default() -> Self {
        let entries = [
            ("Downtown Dubai", AreaTier::Premium),
            ("Dubai Marina", AreaTier::Premium),
            ("Palm Jumeirah", AreaTier::Premium),
            ("Emirates Hills", AreaTier::Premium),
            ("Jumeirah Beach Residence", AreaTier::Premium),
            ("Business Bay", AreaTier::Premium),
            ("Dubai Hills Estate", AreaTier::Premium),
            ("Arabian Ranches", AreaTier::Premium),
            ("Jumeirah Village Circle", AreaTier::MidTier),
            ("Jumeirah Village Triangle", AreaTier::MidTier),
            ("Dubai Sports City", AreaTier::MidTier),
            ("Motor City", AreaTier::MidTier),
            ("The Greens", AreaTier::MidTier),
            ("The Views", AreaTier::MidTier),
            ("Discovery Gardens", AreaTier::MidTier),
            ("Mirdif", AreaTier::MidTier),
            ("International City", AreaTier::Budget),
            ("Deira", AreaTier::Budget),
            ("Bur Dubai", AreaTier::Budget),
            ("Al Nahda", AreaTier::Budget),
            ("Al Qusais", AreaTier::Budget),
            ("Dubai South", AreaTier::Emerging),
            ("Dubailand", AreaTier::Emerging),
            ("Dubai Production City", AreaTier::Emerging),
        ];
        Self(
            entries
                .into_iter()
                .map(|(name, tier)| (name.to_string(), tier))
                .collect(),
        )
    }
}

/// Lower-cased raw property type to canonical name.
///
/// Entries from a config file are merged over the built-in aliases, keys lower-cased.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct PropertyTypeAliases(pub BTreeMap<String, String>);

impl<'de> Deserialize<'de> for PropertyTypeAliases {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let overrides = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut aliases = Self::default();
        aliases
            .0
            .extend(overrides.into_iter().map(|(k, v)| (k.trim().to_lowercase(), v)));
        Ok(aliases)
    }
}

impl Default for PropertyTypeAliases {
    fn default() -> Self {
        let entries = [
            ("apt", "Apartment"),
            ("apartment", "Apartment"),
            ("flat", "Apartment"),
            ("villa", "Villa"),
            ("townhouse", "Townhouse"),
            ("town house", "Townhouse"),
            ("penthouse", "Penthouse"),
            ("studio", "Studio"),
            ("office", "Office"),
            ("shop", "Retail"),
            ("retail", "Retail"),
            ("warehouse", "Warehouse"),
            ("land", "Land"),
            ("plot", "Land"),
        ];
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Exact usage labels that select the residential or commercial PSF bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageCategories {
    pub residential: Vec<String>,
    pub commercial: Vec<String>,
}

impl Default for UsageCategories {
    fn default() -> Self {
        Self {
            residential: [
                "Residential",
                "Residential - Apartment",
                "Residential - Villa",
                "Residential - Townhouse",
                "Residential - Studio",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            commercial: [
                "Commercial",
                "Commercial - Office",
                "Commercial - Retail",
                "Commercial - Warehouse",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_factor: u64,
    /// CSS selector of the anchor that carries the export link.
    pub download_link_selector: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.dubailand.gov.ae".to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
            retry_backoff_factor: 2,
            download_link_selector: "a.action-icon-anchor".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCodec {
    Zstd,
    Snappy,
    Lz4,
    Uncompressed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub output_dir: String,
    pub cache_dir: String,
    pub log_dir: String,
    pub parquet_compression: ParquetCodec,
    pub parquet_compression_level: Option<i32>,
    /// Rows pulled from the head of the input for validation during a transform.
    pub validation_sample_size: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            output_dir: "output".to_string(),
            cache_dir: ".cache".to_string(),
            log_dir: "logs".to_string(),
            parquet_compression: ParquetCodec::Zstd,
            parquet_compression_level: Some(22),
            validation_sample_size: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub top_n_areas: usize,
    pub trend_periods: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_n_areas: 20,
            trend_periods: vec![
                "monthly".to_string(),
                "quarterly".to_string(),
                "yearly".to_string(),
            ],
        }
    }
}

impl MarketConfig {
    /// Load from `path`, else from `$RENT_MARKET_CONFIG`, else built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV_VAR).ok();
        let path = path.or_else(|| env_path.as_deref().map(Path::new));

        let config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|e| {
                    MarketError::Config(format!(
                        "Failed to read config file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };

        config.check()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MarketConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Reject threshold sets that would make every range check meaningless.
    pub fn check(&self) -> Result<()> {
        let v = &self.validation;
        let ranges = [
            ("annual rent", v.min_annual_rent, v.max_annual_rent),
            ("property size", v.min_property_size, v.max_property_size),
            ("residential psf", v.min_psf_residential, v.max_psf_residential),
            ("commercial psf", v.min_psf_commercial, v.max_psf_commercial),
            (
                "contract days",
                v.min_contract_days as f64,
                v.max_contract_days as f64,
            ),
        ];
        for (name, min, max) in ranges {
            if min > max {
                return Err(MarketError::Config(format!(
                    "{} range is inverted: min {} > max {}",
                    name, min, max
                )));
            }
        }

        let m = &self.metrics;
        for (name, pct) in [
            ("luxury_psf_percentile", m.luxury_psf_percentile),
            ("luxury_rent_percentile", m.luxury_rent_percentile),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(MarketError::Config(format!(
                    "{} must be within 0..=100, got {}",
                    name, pct
                )));
            }
        }
        if m.outlier_iqr_multiplier < 0.0 {
            return Err(MarketError::Config(
                "outlier_iqr_multiplier must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Tier of a community; unknown names fall back to the default tier.
    pub fn area_tier(&self, area_name: &str) -> AreaTier {
        self.area_tiers
            .0
            .get(area_name)
            .copied()
            .unwrap_or_default()
    }

    /// Canonical property type name for a raw label.
    pub fn normalize_property_type(&self, raw: &str) -> String {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return "Unknown".to_string();
        }
        match self.property_type_aliases.0.get(&normalized) {
            Some(canonical) => canonical.clone(),
            None => title_case(raw.trim()),
        }
    }

    pub fn is_residential(&self, usage: &str) -> bool {
        self.usage.residential.iter().any(|u| u == usage)
    }

    pub fn is_commercial(&self, usage: &str) -> bool {
        self.usage.commercial.iter().any(|u| u == usage)
    }
}

/// Upper-case the first letter of every word, lower-case the rest.
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut at_word_start = true;
    for c in value.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_area_falls_back_to_mid_tier() {
        let config = MarketConfig::default();
        assert_eq!(config.area_tier("Dubai Marina"), AreaTier::Premium);
        assert_eq!(config.area_tier("Al Qusais"), AreaTier::Budget);
        assert_eq!(config.area_tier("Nowhere"), AreaTier::MidTier);
        assert_eq!(config.area_tier("Nowhere").as_str(), "Mid-Tier");
    }

    #[test]
    fn property_types_map_through_aliases_or_title_case() {
        let config = MarketConfig::default();
        assert_eq!(config.normalize_property_type("  APT "), "Apartment");
        assert_eq!(config.normalize_property_type("Town House"), "Townhouse");
        assert_eq!(config.normalize_property_type("hotel apartment"), "Hotel Apartment");
        assert_eq!(config.normalize_property_type("sky-villa"), "Sky-Villa");
        assert_eq!(config.normalize_property_type("   "), "Unknown");
    }

    #[test]
    fn usage_lists_match_exact_labels() {
        let config = MarketConfig::default();
        assert!(config.is_residential("Residential - Villa"));
        assert!(!config.is_residential("residential"));
        assert!(config.is_commercial("Commercial - Office"));
        assert!(!config.is_commercial("Industrial"));
    }

    #[test]
    fn partial_toml_overrides_only_named_values() {
        let config = MarketConfig::from_toml_str(
            r#"
            [metrics]
            min_area_sample_size = 3

            [files]
            parquet_compression = "snappy"
            parquet_compression_level = 1

            [area_tiers]
            "Al Barsha" = "Mid-Tier"
            "Jumeirah" = "Premium"
            "#,
        )
        .unwrap();

        assert_eq!(config.metrics.min_area_sample_size, 3);
        assert_eq!(config.metrics.luxury_psf_percentile, 75.0);
        assert_eq!(config.files.parquet_compression, ParquetCodec::Snappy);
        assert_eq!(config.area_tier("Jumeirah"), AreaTier::Premium);
        assert_eq!(config.validation.max_contract_days, 730);
    }

    #[test]
    fn table_overrides_merge_with_built_in_entries() {
        let config = MarketConfig::from_toml_str(
            r#"
            [area_tiers]
            "Al Barsha" = "Budget"
            "Deira" = "Emerging"

            [property_type_aliases]
            "Hotel Apt" = "Hotel Apartment"
            "#,
        )
        .unwrap();

        assert_eq!(config.area_tier("Dubai Marina"), AreaTier::Premium);
        assert_eq!(config.area_tier("Al Barsha"), AreaTier::Budget);
        assert_eq!(config.area_tier("Deira"), AreaTier::Emerging);
        assert_eq!(config.normalize_property_type("flat"), "Apartment");
        assert_eq!(config.normalize_property_type("hotel apt"), "Hotel Apartment");
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let mut config = MarketConfig::default();
        config.validation.min_annual_rent = 10.0;
        config.validation.max_annual_rent = 5.0;
        assert!(matches!(config.check(), Err(MarketError::Config(_))));
    }
}
