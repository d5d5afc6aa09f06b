use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use cycle_support::{
    AccumulationArgs, CommonArgs, DashboardArgs, OnchainArgs, StocksArgs, accumulation, dashboard,
    onchain, stocks,
};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Accumulation(AccumulationArgs),
    Stocks(StocksArgs),
    Onchain(OnchainArgs),
    Dashboard(DashboardArgs),
}

fn apply_common_defaults(args: &mut CommonArgs) {
    if args.data_dir.is_none() {
        args.data_dir = Some(PathBuf::from("."));
    }
    if args.out.is_none() {
        args.out = args.data_dir.clone();
    }
    if args.as_of.is_none() {
        args.as_of = Some(Utc::now().date_naive());
    }
}

fn apply_stocks_defaults(args: &mut StocksArgs) {
    apply_common_defaults(&mut args.common);
    if args.offline.is_none() {
        args.offline = Some(false);
    }
}

fn apply_dashboard_defaults(args: &mut DashboardArgs) {
    apply_common_defaults(&mut args.common);
    if args.offline.is_none() {
        args.offline = Some(false);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();
    match args.command {
        Some(Command::Accumulation(mut a)) => {
            apply_common_defaults(&mut a.common);
            accumulation::execute(&a)?;
        }
        Some(Command::Stocks(mut a)) => {
            apply_stocks_defaults(&mut a);
            stocks::execute(&a).await?;
        }
        Some(Command::Onchain(mut a)) => {
            apply_common_defaults(&mut a.common);
            onchain::execute(&a)?;
        }
        Some(Command::Dashboard(mut a)) => {
            apply_dashboard_defaults(&mut a);
            dashboard::execute(&a).await?;
        }
        None => {
            // Default behavior: run the BTC pipelines with defaults
            let mut common = CommonArgs::default();
            apply_common_defaults(&mut common);

            println!("Running with default arguments...");
            println!("1. Accumulation support...");
            accumulation::execute(&AccumulationArgs {
                common: common.clone(),
            })?;

            println!("2. On-chain dashboard...");
            onchain::execute(&OnchainArgs {
                common: common.clone(),
            })?;

            println!("3. Interactive dashboard...");
            let mut dash = DashboardArgs {
                common,
                ..Default::default()
            };
            apply_dashboard_defaults(&mut dash);
            dashboard::execute(&dash).await?;
        }
    }
    Ok(())
}
