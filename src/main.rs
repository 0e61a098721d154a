use log::{error, info, warn};
use std::io;
use std::sync::Arc;

mod core;
mod instances;
mod web;

use crate::core::config::Settings;
use crate::core::metrics::ServiceMetrics;
use crate::core::model::SentimentModel;
use crate::instances::finbert::FinBertBackend;
use crate::web::server::{build_server, AppState};

#[tokio::main]
async fn main() -> io::Result<()> {
    let settings = match Settings::load(None) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
            error!("Invalid configuration: {}", e);
            return Err(io::Error::new(io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().default_filter_or(settings.log_filter().to_string()),
    );
    info!("Starting Sentiment Predictor Service...");
    info!("Model: {}", settings.model_name);
    info!("Device: {}", settings.device);

    let metrics = ServiceMetrics::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let model = Arc::new(SentimentModel::new(settings.clone()));

    // Load the model in the background so health checks answer during the download
    let loader_model = model.clone();
    let loader_settings = settings.clone();
    tokio::spawn(async move {
        if loader_model
            .load_with(move || FinBertBackend::load(&loader_settings))
            .await
            .is_err()
        {
            warn!("Serving without a model; predictions will return 503");
        }
    });

    let state = actix_web::web::Data::new(AppState {
        settings: settings.clone(),
        model,
        metrics,
    });

    let server = build_server(state)?;
    let handle = server.handle();
    let server_task = tokio::spawn(server);

    info!("Sentiment Predictor Service is now running. Press Ctrl+C to stop.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }

    info!("Shutting down Sentiment Predictor Service...");
    handle.stop(true).await;

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Web server error: {:?}", e),
        Err(e) => error!("Error during web server shutdown: {:?}", e),
    }

    info!("Shutdown complete");
    Ok(())
}
