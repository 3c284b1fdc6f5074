use polars::prelude::*;
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, instrument};

use super::{AnalysisOutcome, MarketAnalytics};
use crate::constants::*;
use crate::dataset::{column_dtype, is_temporal};
use crate::error::{MarketError, Result};

/// Aggregation period for rental trends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendPeriod {
    /// First day of the month
    Monthly,
    /// Quarter number 1-4, shared across years
    Quarterly,
    Yearly,
    /// `YYYY-Qn`
    YearQuarter,
}

impl TrendPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendPeriod::Monthly => "monthly",
            TrendPeriod::Quarterly => "quarterly",
            TrendPeriod::Yearly => "yearly",
            TrendPeriod::YearQuarter => "year_quarter",
        }
    }

    fn period_expr(&self, date: Expr) -> Expr {
        match self {
            TrendPeriod::Monthly => date.dt().month_start(),
            TrendPeriod::Quarterly => date.dt().quarter(),
            TrendPeriod::Yearly => date.dt().year(),
            TrendPeriod::YearQuarter => concat_str(
                [
                    date.clone().dt().year().cast(DataType::String),
                    lit("-Q"),
                    date.dt().quarter().cast(DataType::String),
                ],
                "",
                true,
            ),
        }
    }
}

impl fmt::Display for TrendPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendPeriod {
    type Err = MarketError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monthly" => Ok(TrendPeriod::Monthly),
            "quarterly" => Ok(TrendPeriod::Quarterly),
            "yearly" => Ok(TrendPeriod::Yearly),
            "year_quarter" => Ok(TrendPeriod::YearQuarter),
            _ => Err(MarketError::UnknownTrendPeriod(s.to_string())),
        }
    }
}

impl MarketAnalytics<'_> {
    /// Trends for a period given by name; an unknown name is logged and rejected.
    pub fn calculate_rental_trends(&self, period: &str) -> Result<AnalysisOutcome> {
        let period = period.parse::<TrendPeriod>().map_err(|e| {
            error!("Invalid period: {}", period);
            e
        })?;
        self.rental_trends(period)
    }

    /// Contract count, mean and median rent per period, oldest first.
    #[instrument(skip(self))]
    pub fn rental_trends(&self, period: TrendPeriod) -> Result<AnalysisOutcome> {
        info!("Calculating {} rental trends", period);
        let start = self.config.schema.start_date.as_str();
        if let Some(not_applicable) = self.require(&[start]) {
            error!("Column {} not found", start);
            return Ok(not_applicable);
        }
        if !column_dtype(self.data, start).map_or(false, |d| is_temporal(&d)) {
            error!("Column {} is not a date column", start);
            return Ok(AnalysisOutcome::NotApplicable {
                missing_columns: vec![start.to_string()],
            });
        }

        let amount = self.amount();
        let df = self
            .valid_rents()
            .filter(col(start).is_not_null())
            .with_column(period.period_expr(col(start).cast(DataType::Date)).alias(PERIOD))
            .group_by([col(PERIOD)])
            .agg([
                len().cast(DataType::Int64).alias(CONTRACT_COUNT),
                col(amount).mean().alias(AVG_RENT),
                col(amount).median().alias(MEDIAN_RENT),
            ])
            .sort([PERIOD], SortMultipleOptions::default())
            .collect()?;

        info!("Calculated trends for {} periods", df.height());
        Ok(AnalysisOutcome::from_frame(df, "no dated contract has a positive rent"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::config::MarketConfig;
    use crate::dataset::coerce_types;

    fn dated(starts: &[&str], amounts: &[f64]) -> DataFrame {
        let config = MarketConfig::default();
        let raw = df!(
            "contract_start_date" => starts,
            "annual_amount" => amounts,
            "property_usage_en" => vec!["Residential"; starts.len()],
        )
        .unwrap();
        coerce_types(raw.lazy(), &config.schema)
            .unwrap()
            .collect()
            .unwrap()
    }

    #[test]
    fn period_names_parse() {
        assert_eq!("Monthly".parse::<TrendPeriod>().unwrap(), TrendPeriod::Monthly);
        assert_eq!(
            "year_quarter".parse::<TrendPeriod>().unwrap(),
            TrendPeriod::YearQuarter
        );
        assert!(matches!(
            "weekly".parse::<TrendPeriod>(),
            Err(MarketError::UnknownTrendPeriod(p)) if p == "weekly"
        ));
    }

    #[test]
    fn unknown_period_is_an_error() {
        let config = MarketConfig::default();
        let df = dated(&["01-01-2024"], &[50_000.0]);
        let analytics = MarketAnalytics::new(&df, &config).unwrap();
        assert!(matches!(
            analytics.calculate_rental_trends("fortnightly"),
            Err(MarketError::UnknownTrendPeriod(_))
        ));
    }

    #[test]
    fn quarterly_merges_years_but_year_quarter_does_not() {
        let config = MarketConfig::default();
        let df = dated(
            &["15-02-2023", "10-03-2024", "01-07-2024", "bad"],
            &[40_000.0, 60_000.0, 80_000.0, 99_000.0],
        );
        let analytics = MarketAnalytics::new(&df, &config).unwrap();

        let quarterly = analytics.calculate_rental_trends("quarterly").unwrap().into_rows().unwrap();
        assert_eq!(f64s(&quarterly, PERIOD), vec![Some(1.0), Some(3.0)]);
        assert_eq!(f64s(&quarterly, CONTRACT_COUNT), vec![Some(2.0), Some(1.0)]);
        assert_eq!(f64s(&quarterly, AVG_RENT), vec![Some(50_000.0), Some(80_000.0)]);

        let year_quarter = analytics
            .rental_trends(TrendPeriod::YearQuarter)
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(
            strs(&year_quarter, PERIOD),
            vec![
                Some("2023-Q1".to_string()),
                Some("2024-Q1".to_string()),
                Some("2024-Q3".to_string()),
            ]
        );
    }

    #[test]
    fn monthly_truncates_to_first_of_month() {
        let config = MarketConfig::default();
        let df = dated(&["15-02-2024", "28-02-2024", "03-01-2024"], &[10_000.0, 30_000.0, 5_000.0]);
        let analytics = MarketAnalytics::new(&df, &config).unwrap();
        let monthly = analytics.rental_trends(TrendPeriod::Monthly).unwrap().into_rows().unwrap();

        assert_eq!(
            strs(&monthly, PERIOD),
            vec![Some("2024-01-01".to_string()), Some("2024-02-01".to_string())]
        );
        assert_eq!(f64s(&monthly, MEDIAN_RENT), vec![Some(5_000.0), Some(20_000.0)]);
    }

    #[test]
    fn trends_without_start_date_are_not_applicable() {
        let config = MarketConfig::default();
        let df = df!("annual_amount" => [1.0], "property_usage_en" => ["Residential"]).unwrap();
        let analytics = MarketAnalytics::new(&df, &config).unwrap();
        assert!(analytics
            .rental_trends(TrendPeriod::Yearly)
            .unwrap()
            .is_not_applicable());
    }
}
