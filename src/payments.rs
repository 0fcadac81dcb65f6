use async_trait::async_trait;
use log::{error, info};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

const CURRENCY: &str = "usd";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Fail)]
pub enum PaymentError {
    /// The processor answered and refused the request.
    #[fail(display = "{}", _0)]
    Processor(String),
    /// Anything else: transport failures, unreadable answers.
    #[fail(display = "{}", _0)]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment_intent(
        &self,
        amount: i64,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PaymentIntent, PaymentError>;

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, PaymentError>;
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

/// Stripe REST client for payment intents.
pub struct StripeClient {
    http: reqwest::Client,
    api_base: Url,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: String, api_base: Url) -> Result<StripeClient, failure::Error> {
        if api_base.cannot_be_a_base() {
            bail!("Stripe API base {} cannot carry a path", api_base);
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(StripeClient {
            http,
            api_base,
            secret_key,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, PaymentError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| PaymentError::Unexpected(format!("Invalid Stripe API base {}", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn intent_form(amount: i64, metadata: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut form = vec![
        ("amount".to_string(), amount.to_string()),
        ("currency".to_string(), CURRENCY.to_string()),
        (
            "automatic_payment_methods[enabled]".to_string(),
            "true".to_string(),
        ),
    ];
    for (key, value) in metadata {
        form.push((format!("metadata[{}]", key), value.clone()));
    }
    form
}

fn processor_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<StripeErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or_else(|| format!("Stripe request failed with status {}", status))
}

async fn read_intent(response: reqwest::Response) -> Result<PaymentIntent, PaymentError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PaymentError::Unexpected(format!("Error reading Stripe response: {}", e)))?;
    if !status.is_success() {
        let message = processor_message(status, &body);
        error!("Stripe error ({}): {}", status, message);
        return Err(PaymentError::Processor(message));
    }
    serde_json::from_str(&body)
        .map_err(|e| PaymentError::Unexpected(format!("Unexpected Stripe response: {}", e)))
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_payment_intent(
        &self,
        amount: i64,
        metadata: &BTreeMap<String, String>,
    ) -> Result<PaymentIntent, PaymentError> {
        info!("Creating payment intent for {} {} ({:?})", amount, CURRENCY, metadata);
        let response = self
            .http
            .post(self.endpoint(&["v1", "payment_intents"])?)
            .bearer_auth(&self.secret_key)
            .form(&intent_form(amount, metadata))
            .send()
            .await
            .map_err(|e| PaymentError::Unexpected(format!("Error contacting Stripe: {}", e)))?;
        let intent = read_intent(response).await?;
        info!("Created payment intent {}", intent.id);
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, PaymentError> {
        info!("Retrieving payment intent {}", id);
        let response = self
            .http
            .get(self.endpoint(&["v1", "payment_intents", id])?)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| PaymentError::Unexpected(format!("Error contacting Stripe: {}", e)))?;
        read_intent(response).await
    }
}
