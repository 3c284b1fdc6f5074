use polars::prelude::*;
use serde::Serialize;
use tracing::{info, instrument};

use super::{AnalysisOutcome, MarketAnalytics};
use crate::constants::*;
use crate::dataset::{cell_f64, count_where};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RentStatistics {
    pub avg_rent: f64,
    pub median_rent: f64,
    pub min_rent: f64,
    pub max_rent: f64,
    pub std_rent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PsfStatistics {
    pub contracts: usize,
    pub avg_psf: f64,
    pub median_psf: f64,
    pub luxury_contracts: usize,
}

/// One usage segment in the summary breakdown
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UsageShare {
    pub usage: Option<String>,
    pub contract_count: usize,
    pub avg_rent: Option<f64>,
    pub median_rent: Option<f64>,
    pub market_share_pct: f64,
}

/// Headline figures for a dataset
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MarketSummary {
    pub total_contracts: usize,
    /// Absent when no contract has a positive rent
    pub rent: Option<RentStatistics>,
    /// Absent when the PSF subset is empty or not computable
    pub psf: Option<PsfStatistics>,
    pub usage_breakdown: Vec<UsageShare>,
}

impl MarketSummary {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Flatten to `(metric, value)` pairs; absent figures are skipped.
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let mut out = vec![("total_contracts".to_string(), self.total_contracts as f64)];
        if let Some(rent) = &self.rent {
            out.push((AVG_RENT.to_string(), rent.avg_rent));
            out.push((MEDIAN_RENT.to_string(), rent.median_rent));
            out.push((MIN_RENT.to_string(), rent.min_rent));
            out.push((MAX_RENT.to_string(), rent.max_rent));
            if let Some(std) = rent.std_rent {
                out.push((STD_RENT.to_string(), std));
            }
        }
        if let Some(psf) = &self.psf {
            out.push(("psf_contracts".to_string(), psf.contracts as f64));
            out.push((AVG_PSF.to_string(), psf.avg_psf));
            out.push((MEDIAN_PSF.to_string(), psf.median_psf));
            out.push(("luxury_contracts".to_string(), psf.luxury_contracts as f64));
        }
        for segment in &self.usage_breakdown {
            let label = segment.usage.as_deref().unwrap_or("unknown");
            out.push((
                format!("usage_share_pct[{}]", label),
                segment.market_share_pct,
            ));
        }
        out
    }
}

impl MarketAnalytics<'_> {
    #[instrument(skip_all)]
    pub fn generate_market_summary(&self) -> Result<MarketSummary> {
        info!("Generating market summary");
        let amount = self.amount();

        let stats = self
            .valid_rents()
            .select([
                len().cast(DataType::Int64).alias(CONTRACT_COUNT),
                col(amount).mean().alias(AVG_RENT),
                col(amount).median().alias(MEDIAN_RENT),
                col(amount).min().alias(MIN_RENT),
                col(amount).max().alias(MAX_RENT),
                col(amount).std(1).alias(STD_RENT),
            ])
            .collect()?;
        let rent = match (
            cell_f64(&stats, AVG_RENT, 0)?,
            cell_f64(&stats, MEDIAN_RENT, 0)?,
            cell_f64(&stats, MIN_RENT, 0)?,
            cell_f64(&stats, MAX_RENT, 0)?,
        ) {
            (Some(avg_rent), Some(median_rent), Some(min_rent), Some(max_rent)) => {
                Some(RentStatistics {
                    avg_rent,
                    median_rent,
                    min_rent,
                    max_rent,
                    std_rent: cell_f64(&stats, STD_RENT, 0)?,
                })
            }
            _ => None,
        };

        let psf = match self.identify_luxury_properties()? {
            AnalysisOutcome::Rows(tagged) => {
                let averages = tagged
                    .clone()
                    .lazy()
                    .select([
                        col(PSF).mean().alias(AVG_PSF),
                        col(PSF).median().alias(MEDIAN_PSF),
                    ])
                    .collect()?;
                match (
                    cell_f64(&averages, AVG_PSF, 0)?,
                    cell_f64(&averages, MEDIAN_PSF, 0)?,
                ) {
                    (Some(avg_psf), Some(median_psf)) => Some(PsfStatistics {
                        contracts: tagged.height(),
                        avg_psf,
                        median_psf,
                        luxury_contracts: count_where(&tagged, col(IS_LUXURY))?,
                    }),
                    _ => None,
                }
            }
            _ => None,
        };

        let usage_breakdown = match self.segment_by_usage()? {
            AnalysisOutcome::Rows(segments) => usage_shares(&segments, self.usage())?,
            _ => Vec::new(),
        };

        info!("Market summary generated");
        Ok(MarketSummary {
            total_contracts: self.data.height(),
            rent,
            psf,
            usage_breakdown,
        })
    }
}

fn usage_shares(segments: &DataFrame, usage: &str) -> Result<Vec<UsageShare>> {
    let labels = segments.column(usage)?.cast(&DataType::String)?;
    let labels = labels.str()?;
    (0..segments.height())
        .map(|row| {
            Ok(UsageShare {
                usage: labels.get(row).map(str::to_string),
                contract_count: cell_f64(segments, CONTRACT_COUNT, row)?.unwrap_or(0.0) as usize,
                avg_rent: cell_f64(segments, AVG_RENT, row)?,
                median_rent: cell_f64(segments, MEDIAN_RENT, row)?,
                market_share_pct: cell_f64(segments, MARKET_SHARE_PCT, row)?.unwrap_or(0.0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::MarketConfig;

    #[test]
    fn summary_of_small_market() {
        let config = MarketConfig::default();
        let df = contracts(
            &["Dubai Marina", "Deira", "Deira", "Business Bay"],
            &["Residential", "Residential", "Commercial", "Residential"],
            &[120_000.0, 60_000.0, 90_000.0, -10.0],
            &[1_000.0, 1_000.0, 3_000.0, 500.0],
        );
        let analytics = MarketAnalytics::new(&df, &config).unwrap();
        let summary = analytics.generate_market_summary().unwrap();

        assert_eq!(summary.total_contracts, 4);
        let rent = summary.rent.clone().unwrap();
        assert_eq!(rent.avg_rent, 90_000.0);
        assert_eq!(rent.min_rent, 60_000.0);
        assert_eq!(rent.max_rent, 120_000.0);

        let psf = summary.psf.clone().unwrap();
        assert_eq!(psf.contracts, 3);
        assert_eq!(psf.median_psf, 60.0);

        assert_eq!(summary.usage_breakdown.len(), 2);
        assert_eq!(summary.usage_breakdown[0].usage.as_deref(), Some("Residential"));
        assert_eq!(summary.usage_breakdown[0].contract_count, 2);

        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(json["total_contracts"], 4);
        assert_eq!(json["usage_breakdown"][1]["usage"], "Commercial");
    }

    #[test]
    fn summary_without_valid_rents() {
        let config = MarketConfig::default();
        let df = contracts(&["Deira"], &["Residential"], &[0.0], &[1_000.0]);
        let summary = MarketAnalytics::new(&df, &config)
            .unwrap()
            .generate_market_summary()
            .unwrap();

        assert_eq!(summary.total_contracts, 1);
        assert!(summary.rent.is_none());
        assert!(summary.psf.is_none());
        assert!(summary.usage_breakdown.is_empty());
        assert_eq!(summary.metrics(), vec![("total_contracts".to_string(), 1.0)]);
    }
}
