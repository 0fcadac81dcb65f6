use crate::config::{ParkingLotConfig, MAIN_LOT_ID, MAIN_LOT_NAME};
use crate::detector::{self, Detector};
use crate::error::ApiError;
use crate::imaging;
use crate::lot;
use crate::payments::{PaymentError, PaymentProcessor};
use crate::types::{PaymentIntentRequest, SpotDetectionRequest, SpotDetectionResponse};
use log::{debug, error, info};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, VARY,
};
use warp::http::{HeaderValue, StatusCode};
use warp::{Filter, Rejection, Reply};

const IMAGE_BODY_LIMIT: u64 = 16 * 1024 * 1024;
const JSON_BODY_LIMIT: u64 = 64 * 1024;
const PREFLIGHT_METHODS: &str = "DELETE, GET, HEAD, OPTIONS, PATCH, POST, PUT";

/// Process-lifetime collaborators shared by every request.
pub struct Context {
    pub detector: Arc<dyn Detector>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub lot: ParkingLotConfig,
    pub publishable_key: Option<String>,
}

pub fn api(ctx: Arc<Context>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let with_ctx = warp::any().map(move || ctx.clone());

    let root = warp::path::end().and(warp::get()).map(|| {
        warp::reply::json(&json!({ "message": "Welcome to Parking Spot Detection API" }))
    });

    let payment_intent = warp::path!("create-payment-intent")
        .and(warp::post())
        .and(warp::body::content_length_limit(JSON_BODY_LIMIT))
        .and(warp::body::json())
        .and(with_ctx.clone())
        .and_then(|request: PaymentIntentRequest, ctx: Arc<Context>| async move {
            into_rejection(create_payment_intent(request, ctx).await)
        });

    let detect = warp::path!("detect-spots")
        .and(warp::post())
        .and(warp::body::content_length_limit(IMAGE_BODY_LIMIT))
        .and(warp::body::json())
        .and(with_ctx.clone())
        .and_then(|request: SpotDetectionRequest, ctx: Arc<Context>| async move {
            into_rejection(detect_spots(request, ctx).await)
        });

    let lot_info = warp::path!("parking-lot" / "main")
        .and(warp::get())
        .and(with_ctx.clone())
        .map(|ctx: Arc<Context>| parking_lot(&ctx.lot));

    let payment_details = warp::path!("payment-intent" / String)
        .and(warp::get())
        .and(with_ctx.clone())
        .and_then(|id: String, ctx: Arc<Context>| async move {
            into_rejection(payment_intent_details(id, ctx).await)
        });

    let client_config = warp::path!("config")
        .and(warp::get())
        .and(with_ctx)
        .map(|ctx: Arc<Context>| {
            warp::reply::json(&json!({ "publishableKey": ctx.publishable_key }))
        });

    let routes = root
        .or(payment_intent)
        .or(detect)
        .or(lot_info)
        .or(payment_details)
        .or(client_config)
        .recover(handle_rejection);

    warp::header::optional::<String>("origin")
        .and(preflight().or(routes))
        .map(allow_origin)
        .with(warp::log("parking_api"))
}

/// Answers any CORS preflight, granting whatever headers the browser asks for.
fn preflight() -> impl Filter<Extract = (warp::reply::Response,), Error = Rejection> + Clone {
    warp::options()
        .and(warp::header::<String>("access-control-request-method"))
        .and(warp::header::optional::<String>("access-control-request-headers"))
        .map(|method: String, requested: Option<String>| {
            debug!("CORS preflight for {} ({:?})", method, requested);
            let mut response = warp::reply().into_response();
            let headers = response.headers_mut();
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(PREFLIGHT_METHODS),
            );
            if let Some(value) = requested.and_then(|h| HeaderValue::from_str(&h).ok()) {
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
            }
            headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
            response
        })
}

/// Echoes the caller's origin with credentials allowed, or `*` when there is none.
fn allow_origin<R: Reply>(origin: Option<String>, reply: R) -> warp::reply::Response {
    let mut response = reply.into_response();
    let headers = response.headers_mut();
    match origin.and_then(|o| HeaderValue::from_str(&o).ok()) {
        Some(origin) => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
            headers.append(VARY, HeaderValue::from_static("origin"));
        }
        None => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
    }
    response
}

fn into_rejection<T: Reply>(result: Result<T, ApiError>) -> Result<T, Rejection> {
    result.map_err(|e| {
        error!("Request failed ({}): {}", e.status(), e);
        warp::reject::custom(e)
    })
}

async fn create_payment_intent(
    request: PaymentIntentRequest,
    ctx: Arc<Context>,
) -> Result<warp::reply::Json, ApiError> {
    let mut metadata = BTreeMap::new();
    metadata.insert("spot_id".to_string(), request.spot_id);
    let intent = ctx
        .payments
        .create_payment_intent(request.amount, &metadata)
        .await?;
    match intent.client_secret {
        Some(secret) => Ok(warp::reply::json(&json!({ "clientSecret": secret }))),
        None => Err(ApiError::Payment(PaymentError::Unexpected(format!(
            "Payment intent {} has no client secret",
            intent.id
        )))),
    }
}

async fn payment_intent_details(
    id: String,
    ctx: Arc<Context>,
) -> Result<warp::reply::Json, ApiError> {
    let intent = ctx.payments.retrieve_payment_intent(&id).await?;
    Ok(warp::reply::json(&json!({
        "paymentIntentId": intent.id,
        "status": intent.status,
        "amount": intent.amount,
        "currency": intent.currency,
        "metadata": intent.metadata,
    })))
}

async fn detect_spots(
    request: SpotDetectionRequest,
    ctx: Arc<Context>,
) -> Result<warp::reply::Json, ApiError> {
    if request.image.is_empty() {
        return Err(ApiError::BadRequest("No image provided".to_string()));
    }
    debug!("Detecting spots for lot {}", request.lot_id);

    let image = imaging::decode_data_url(&request.image).map_err(|e| {
        error!("Image decoding error: {}", e);
        ApiError::BadRequest("Invalid image format".to_string())
    })?;

    // Inference is CPU bound and may wait on the model lock.
    let model = ctx.detector.clone();
    let (image, result) = tokio::task::spawn_blocking(move || {
        let result = model.detect(&image);
        (image, result)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;
    let raw = result.map_err(|e| {
        error!("Detection error: {}", e);
        ApiError::Internal("Error during vehicle detection".to_string())
    })?;

    let detections = detector::filter_vehicles(raw);
    for d in &detections {
        debug!(
            "Vehicle {} ({:.2}) at {:?}",
            detector::vehicle_label(d.class_id).unwrap_or("?"),
            d.confidence,
            d.bbox
        );
    }

    let mut spots = lot::spot_grid(&ctx.lot);
    lot::mark_occupancy(&mut spots, &detections);
    let available_spots = lot::available_count(&spots);
    info!(
        "{} vehicles detected, {}/{} spots available",
        detections.len(),
        available_spots,
        ctx.lot.total_spots
    );

    // The echoed image is optional; a failed encode still returns the spots.
    let encoded = match imaging::encode_jpeg_base64(&image) {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            error!("Image encoding error: {}", e);
            None
        }
    };

    Ok(warp::reply::json(&SpotDetectionResponse {
        spots,
        image: encoded,
        total_spots: ctx.lot.total_spots,
        available_spots,
        detections,
    }))
}

#[derive(Serialize)]
struct LotSummary<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(flatten)]
    config: &'a ParkingLotConfig,
}

fn parking_lot(config: &ParkingLotConfig) -> warp::reply::Json {
    warp::reply::json(&LotSummary {
        id: MAIN_LOT_ID,
        name: MAIN_LOT_NAME,
        config,
    })
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, body) = if let Some(e) = err.find::<ApiError>() {
        (e.status(), e.body())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, json!({ "detail": "Not Found" }))
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, json!({ "detail": e.to_string() }))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            json!({ "detail": "Request body too large" }),
        )
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (
            StatusCode::LENGTH_REQUIRED,
            json!({ "detail": "Content-Length required" }),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "detail": "Method Not Allowed" }),
        )
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "detail": "Internal Server Error" }),
        )
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}
