use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use rent_market::config::MarketConfig;
use rent_market::dataset::load_dataset;
use rent_market::infra::downloader::RentContractsDownloader;
use rent_market::infra::http_client::ReqwestHttp;
use rent_market::logging;
use rent_market::pipeline::parquet_out::write_parquet;
use rent_market::pipeline::processing::analytics::{MarketAnalytics, TrendPeriod};
use rent_market::pipeline::processing::enrich::{DefaultEnricher, Enricher};
use rent_market::pipeline::processing::quality_gate::validate_rent_contracts;
use rent_market::pipeline::reports::PropertyUsageReport;
use rent_market::pipeline::transform::RentContractsTransformer;

#[derive(Parser)]
#[command(name = "rent_market")]
#[command(about = "Rent contract ETL, validation and market analytics")]
#[command(version)]
struct Cli {
    /// TOML file overriding the built-in market rules
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the rolling JSON log (defaults to files.log_dir)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the rent contract export linked from the listing page
    Download {
        /// Listing page (defaults to api.base_url)
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Convert the raw CSV export to Parquet
    Transform {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Skip sample validation
        #[arg(long)]
        no_validate: bool,
    },
    /// Validate a dataset and print the findings
    Validate {
        #[arg(long)]
        input: PathBuf,
        /// Treat null required fields as errors
        #[arg(long)]
        strict: bool,
    },
    /// Add derived columns and write Parquet
    Enrich {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Write every analytics table as CSV plus the market summary
    Analyze {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
        /// Trend periods (repeatable); defaults to reports.trend_periods
        #[arg(long)]
        period: Vec<String>,
    },
    /// Per-usage rent report
    UsageReport {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Compare usage statistics of two periods
    Compare {
        #[arg(long)]
        current: PathBuf,
        #[arg(long)]
        previous: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = MarketConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.files.log_dir));
    let _guard = logging::init_logging(&log_dir)?;

    match cli.command {
        Commands::Download { url, output } => {
            let url = url.unwrap_or_else(|| config.api.base_url.clone());
            let span = tracing::info_span!("download", url = %url);
            let _enter = span.enter();

            let http = ReqwestHttp::new(Duration::from_secs(config.api.request_timeout_secs))?;
            let report = RentContractsDownloader::new(http, config.api.clone())
                .run(&url, &output)
                .await?;
            println!("Downloaded {} bytes to {}", report.bytes, output.display());
            println!("sha256 {}", report.sha256);
        }
        Commands::Transform {
            input,
            output,
            no_validate,
        } => {
            let report =
                RentContractsTransformer::new(&input, &output, !no_validate, &config).transform()?;
            println!(
                "Wrote {} rows ({} bytes) to {}",
                report.rows_written,
                report.bytes_written,
                output.display()
            );
        }
        Commands::Validate { input, strict } => {
            let df = load_dataset(&input, &config.schema)?;
            let result = validate_rent_contracts(&df, &config, strict)?;
            println!("{}", result);
            if !result.is_valid() {
                bail!("validation failed with {} errors", result.errors.len());
            }
        }
        Commands::Enrich { input, output } => {
            let df = load_dataset(&input, &config.schema)?;
            let enriched = DefaultEnricher::new(&config).enrich(&df)?;
            for skipped in &enriched.report.skipped {
                warn!("{} not applicable: {}", skipped.derivation, skipped.reason);
            }
            let mut data = enriched.data;
            write_parquet(&mut data, &output, &config.files)?;
            println!(
                "Enriched {} rows with {} derived columns",
                data.height(),
                enriched.report.applied.len()
            );
        }
        Commands::Analyze {
            input,
            output_dir,
            period,
        } => {
            let periods = if period.is_empty() {
                config.reports.trend_periods.clone()
            } else {
                period
            };
            analyze(&config, &input, &output_dir, &periods)?;
        }
        Commands::UsageReport { input, output } => {
            let report = PropertyUsageReport::new(&config).transform(&input, &output)?;
            println!("Wrote {} usage categories to {}", report.height(), output.display());
        }
        Commands::Compare {
            current,
            previous,
            output,
        } => {
            let comparison =
                PropertyUsageReport::new(&config).compare_periods(&current, &previous, &output)?;
            println!("Compared {} usage categories into {}", comparison.height(), output.display());
        }
    }

    Ok(())
}

fn analyze(
    config: &MarketConfig,
    input: &Path,
    output_dir: &Path,
    periods: &[String],
) -> anyhow::Result<()> {
    // Parse up front so a bad name fails before any file is written
    let periods = periods
        .iter()
        .map(|p| p.parse::<TrendPeriod>())
        .collect::<Result<Vec<_>, _>>()?;

    let df = load_dataset(input, &config.schema)?;
    let analytics = MarketAnalytics::new(&df, config)?;
    let reports = PropertyUsageReport::new(config);

    let tables = [
        ("psf_metrics", analytics.calculate_psf_metrics()?),
        ("by_area", analytics.analyze_by_area()?),
        (
            "high_demand_areas",
            analytics.identify_high_demand_areas(config.reports.top_n_areas)?,
        ),
        ("by_property_type", analytics.analyze_by_property_type()?),
        ("by_usage", analytics.segment_by_usage()?),
        ("luxury_properties", analytics.identify_luxury_properties()?),
    ];
    for (name, outcome) in &tables {
        let path = output_dir.join(format!("{}.csv", name));
        if reports.export_outcome(name, outcome, &path)? {
            info!("{}: {} rows", name, outcome.height());
        }
    }

    for period in periods {
        let outcome = analytics.rental_trends(period)?;
        let path = output_dir.join(format!("trends_{}.csv", period));
        reports.export_outcome(&format!("{} trends", period), &outcome, &path)?;
    }

    let summary = analytics.generate_market_summary()?;
    reports.export_summary(&summary, &output_dir.join("market_summary.csv"))?;
    reports.export_summary_json(&summary, &output_dir.join("market_summary.json"))?;

    println!("{}", summary.to_json()?);
    Ok(())
}
