pub mod accumulation;
pub mod chart;
pub mod config;
pub mod cycle;
pub mod dashboard;
pub mod fetch;
pub mod onchain;
pub mod output;
pub mod schedule;
pub mod series;
pub mod stocks;

use chrono::NaiveDate;
use clap::{Args, Parser};
use std::path::PathBuf;

/// Flags shared by every pipeline
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Directory holding btc-usd-max.csv, metric JSON caches and <TICKER>.csv files
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Output directory for charts and the dashboard
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// JSON file overriding the built-in cycle tables, windows and endpoints
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Treat this date (YYYY-MM-DD) as today. Defaults to the current UTC date.
    #[arg(long)]
    pub as_of: Option<NaiveDate>,
}

/// Does the lowest price of the first 200 days after each halving hold through the bear market?
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct AccumulationArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Same question for equities, counted in trading days from each cycle bottom.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct StocksArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Skip the download and analyze the cached <TICKER>.csv files
    #[arg(long)]
    pub offline: Option<bool>,
}

/// Static on-chain chart (MVRV, realized price, LTH supply, exchange flows) from cached files.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct OnchainArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// Refresh on-chain metrics and write the interactive HTML dashboard
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct DashboardArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Daily schedule: run every day at this local time (HH:MM). Example: --daily-at 08:00
    /// If not set, program runs once and exits (suitable for cron/systemd).
    #[arg(long)]
    pub daily_at: Option<String>,

    /// Optional lock file path to prevent concurrent runs
    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Skip the network and build from the cached metric files
    #[arg(long)]
    pub offline: Option<bool>,
}
