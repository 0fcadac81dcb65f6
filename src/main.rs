mod config;
mod detector;
mod error;
mod imaging;
mod lot;
mod payments;
mod routes;
mod types;

use config::{Settings, MAIN_LOT};
use detector::YoloDetector;
use env_logger::Env;
use log::{error, info};
use payments::StripeClient;
use std::sync::Arc;

#[macro_use]
extern crate failure;

#[tokio::main]
async fn main() {
    // A missing .env file is fine; the environment may already be set.
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting parking-spot-api");

    if let Err(e) = run().await {
        error!("Failed to start server: {}", e);
        std::process::exit(1);
    }
    info!("Exiting main");
}

async fn run() -> Result<(), failure::Error> {
    let settings = Settings::from_env()?;

    let detector = YoloDetector::load(&settings.model_path)?;
    info!("Detection model loaded successfully");
    let payments = StripeClient::new(
        settings.stripe_secret_key.clone(),
        settings.stripe_api_base.clone(),
    )?;

    let ctx = Arc::new(routes::Context {
        detector: Arc::new(detector),
        payments: Arc::new(payments),
        lot: MAIN_LOT,
        publishable_key: settings.stripe_publishable_key.clone(),
    });

    let (addr, server) = warp::serve(routes::api(ctx)).try_bind_with_graceful_shutdown(
        ([0, 0, 0, 0], settings.port),
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Error waiting for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        },
    )?;
    info!("Listening on http://{}", addr);
    server.await;
    Ok(())
}
