use crate::{config::AppConfig, errors::ServiceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// A payment intent as returned by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayIntent {
    /// Gateway-assigned identifier, used as the confirmation key
    pub id: String,
    /// Secret the client uses to complete payment against the gateway
    pub client_secret: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Boundary to the external payment provider. The checkout service only
/// ever asks for an intent; confirmation comes back through the client
/// or the provider's webhook, never through this trait.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
    ) -> Result<GatewayIntent, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: String,
}

/// Stripe-compatible provider over HTTP. Unconfigured deployments get a
/// provider that rejects every checkout rather than one that fakes
/// success.
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: Option<String>,
    secret: Option<String>,
}

impl HttpPaymentProvider {
    pub fn new(base_url: Option<String>, secret: Option<String>, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url,
            secret,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.payment_gateway_url.clone(),
            config.payment_gateway_secret.clone(),
            config.payment_gateway_timeout_secs,
        )
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    #[instrument(skip(self))]
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        let (Some(base_url), Some(secret)) = (&self.base_url, &self.secret) else {
            warn!("Payment gateway is not configured; rejecting checkout");
            return Err(ServiceError::GatewayUnavailable(
                "gateway credentials not configured".to_string(),
            ));
        };

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", base_url))
            .bearer_auth(secret)
            .form(&[
                ("amount", amount_minor.to_string()),
                ("currency", currency.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::GatewayUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Payment gateway rejected intent creation");
            return Err(ServiceError::PaymentFailed(format!(
                "gateway returned {}: {}",
                status, body
            )));
        }

        let intent: IntentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayUnavailable(e.to_string()))?;

        info!(intent_id = %intent.id, amount_minor, "Payment intent created");

        Ok(GatewayIntent {
            id: intent.id,
            client_secret: intent.client_secret,
            amount_minor,
            currency: currency.to_string(),
        })
    }
}
