use log::warn;
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use url::Url;

pub const MAIN_LOT_ID: &str = "main";
pub const MAIN_LOT_NAME: &str = "Main Parking Lot";

/// Geometry and pricing of a lot. Spot sizes are in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParkingLotConfig {
    pub total_spots: u32,
    pub rows: u32,
    pub columns: u32,
    pub spot_width: u32,
    pub spot_height: u32,
    pub hourly_rate: f64,
}

pub const MAIN_LOT: ParkingLotConfig = ParkingLotConfig {
    total_spots: 50,
    rows: 5,
    columns: 10,
    spot_width: 100,
    spot_height: 200,
    hourly_rate: 5.00,
};

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub model_path: PathBuf,
    pub stripe_secret_key: String,
    pub stripe_publishable_key: Option<String>,
    pub stripe_api_base: Url,
}

impl Settings {
    pub fn from_env() -> Result<Settings, failure::Error> {
        let port = match env::var("PORT") {
            Ok(port) => port
                .parse()
                .map_err(|e| format_err!("Invalid PORT {:?}: {}", port, e))?,
            Err(_) => DEFAULT_PORT,
        };
        let model_path = env::var("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_MODEL_PATH));
        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").unwrap_or_else(|_| {
            warn!("STRIPE_SECRET_KEY environment variable unset; payment calls will fail");
            String::new()
        });
        let stripe_publishable_key = env::var("STRIPE_PUBLISHABLE_KEY").ok();
        let api_base = env::var("STRIPE_API_BASE")
            .unwrap_or_else(|_| DEFAULT_STRIPE_API_BASE.to_string());
        let stripe_api_base = Url::parse(&api_base)
            .map_err(|e| format_err!("Invalid STRIPE_API_BASE {:?}: {}", api_base, e))?;
        Ok(Settings {
            port,
            model_path,
            stripe_secret_key,
            stripe_publishable_key,
            stripe_api_base,
        })
    }
}
