use crate::alpha_vantage::AlphaVantageClient;
use crate::context::AppContext;
use crate::dataset::write_price_history;
use anyhow::{Context, Result};
use log::info;
use std::path::Path;

pub async fn run(app: &AppContext, symbol: &str, years: u32, output_path: &Path) -> Result<()> {
    let settings = app.settings();
    info!(
        "Collecting {} year(s) of daily prices for {}",
        years,
        symbol.to_uppercase()
    );

    let http = app.http_client()?;
    let client = AlphaVantageClient::new(&http, &settings.api_base_url, settings.api_key.as_deref())?;
    let records = client
        .fetch_daily_history(symbol, years)
        .await
        .with_context(|| format!("Failed to download price history for {}", symbol))?;

    write_price_history(output_path, &records)?;
    info!(
        "Price history written to {} ({} rows, {} to {})",
        output_path.display(),
        records.len(),
        records[0].date,
        records[records.len() - 1].date
    );
    Ok(())
}
