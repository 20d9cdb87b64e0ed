use crate::context::AppContext;
use crate::service;
use anyhow::Result;
use log::info;
use std::path::Path;

pub async fn run(
    app: &AppContext,
    host: Option<String>,
    port: Option<u16>,
    model_path: &Path,
) -> Result<()> {
    let mut server = app.settings().server.clone();
    if let Some(host) = host {
        server.host = host;
    }
    if let Some(port) = port {
        server.port = port;
    }
    info!(
        "Serving forecasts from {} (reload on every request: {}, max horizon {} days)",
        model_path.display(),
        server.reload,
        server.max_forecast_days
    );
    service::serve(&server, model_path).await
}
