use anyhow::Result;
use clap::{Parser, Subcommand};
use forecaster::{
    commands::{download, evaluate, serve, train},
    context::AppContext,
    logging,
};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forecaster")]
#[command(about = "Collects daily stock prices, trains a forecasting model and serves forecasts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily prices from Alpha Vantage into a CSV file
    Download {
        /// Ticker symbol (defaults to STOCK_SYMBOL)
        #[arg(long)]
        symbol: Option<String>,
        /// Years of history to keep (defaults to HISTORY_YEARS)
        #[arg(long)]
        years: Option<u32>,
        /// Destination CSV (defaults to DATA_PATH)
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Grid-search, evaluate and persist the forecasting model
    Train {
        /// Price history CSV (defaults to DATA_PATH)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// JSON training config overriding the defaults (defaults to TRAINING_CONFIG)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        /// Destination for the model artifact (defaults to MODEL_PATH)
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Re-score the saved model configuration on the most recent rows of the CSV
    Evaluate {
        /// Price history CSV (defaults to DATA_PATH)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Model artifact to evaluate (defaults to MODEL_PATH)
        #[arg(long, value_name = "PATH")]
        model: Option<PathBuf>,
        /// Number of trailing rows held out for scoring
        #[arg(long = "test-days")]
        test_days: Option<usize>,
    },
    /// Serve forecasts over HTTP
    Serve {
        /// Bind address (defaults to HOST)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (defaults to PORT)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let Cli { command } = Cli::parse();

    let app_context = AppContext::initialize()?;
    let settings = app_context.settings().clone();
    let log_file = match command {
        Commands::Train { .. } | Commands::Evaluate { .. } => {
            Some(settings.training_log_path.as_path())
        }
        _ => None,
    };
    logging::init(log_file)?;

    match command {
        Commands::Download {
            symbol,
            years,
            output,
        } => {
            let symbol = symbol.unwrap_or_else(|| settings.symbol.clone());
            let years = years.unwrap_or(settings.history_years);
            let output = output.unwrap_or_else(|| settings.data_path.clone());
            download::run(&app_context, &symbol, years, &output).await?;
        }
        Commands::Train {
            data_file,
            config,
            output,
        } => {
            let data_file = data_file.unwrap_or_else(|| settings.data_path.clone());
            let output = output.unwrap_or_else(|| settings.model_path.clone());
            train::run(&app_context, &data_file, config.as_deref(), &output)?;
        }
        Commands::Evaluate {
            data_file,
            model,
            test_days,
        } => {
            let data_file = data_file.unwrap_or_else(|| settings.data_path.clone());
            let model = model.unwrap_or_else(|| settings.model_path.clone());
            evaluate::run(&app_context, &data_file, &model, test_days)?;
        }
        Commands::Serve { host, port } => {
            serve::run(&app_context, host, port, &settings.model_path).await?;
        }
    }

    info!("Done");
    Ok(())
}
