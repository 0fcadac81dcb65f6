use crate::payments::PaymentError;
use serde_json::{json, Value};
use warp::http::StatusCode;

/// Request-level failure. Detection errors answer `{"detail": ..}`,
/// payment errors answer `{"error": ..}`.
#[derive(Debug, Fail)]
pub enum ApiError {
    #[fail(display = "{}", _0)]
    BadRequest(String),
    #[fail(display = "{}", _0)]
    Internal(String),
    #[fail(display = "{}", _0)]
    Payment(PaymentError),
}

impl warp::reject::Reject for ApiError {}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Payment(PaymentError::Processor(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Internal(_) | ApiError::Payment(PaymentError::Unexpected(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> Value {
        match self {
            ApiError::Payment(e) => json!({ "error": e.to_string() }),
            other => json!({ "detail": other.to_string() }),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> ApiError {
        ApiError::Payment(e)
    }
}
