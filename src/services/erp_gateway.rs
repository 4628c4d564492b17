//! ERP registration gate for the ACTIVE -> CONFIRMED transition.
//!
//! A failed registration is an expected outcome, reported through [`RegistrationResult`];
//! implementations never panic and never retry on their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{GatewayConfig, GatewayMode};
use crate::entities::reservation;
use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub success: bool,
    pub document_no: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl RegistrationResult {
    pub fn registered(document_no: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            document_no: Some(document_no.into()),
            registered_at: Some(at),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            document_no: None,
            registered_at: None,
            error_message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait ErpGateway: Send + Sync {
    async fn register_allocation(&self, reservation: &reservation::Model) -> RegistrationResult;

    fn name(&self) -> &'static str;
}

/// Accepts every registration and issues a synthetic document number.
#[derive(Debug, Clone, Default)]
pub struct MockSuccessGateway;

#[async_trait]
impl ErpGateway for MockSuccessGateway {
    async fn register_allocation(&self, reservation: &reservation::Model) -> RegistrationResult {
        let simple = reservation.id.simple().to_string();
        let document_no = format!("MOCK-{}", simple[..10].to_uppercase());
        RegistrationResult::registered(document_no, Utc::now())
    }

    fn name(&self) -> &'static str {
        "mock-success"
    }
}

/// Rejects every registration with a fixed message.
#[derive(Debug, Clone)]
pub struct MockFailureGateway {
    message: String,
}

impl MockFailureGateway {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for MockFailureGateway {
    fn default() -> Self {
        Self::new("ERP registration rejected")
    }
}

#[async_trait]
impl ErpGateway for MockFailureGateway {
    async fn register_allocation(&self, _reservation: &reservation::Model) -> RegistrationResult {
        RegistrationResult::failed(self.message.clone())
    }

    fn name(&self) -> &'static str {
        "mock-failure"
    }
}

#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    reservation_id: Uuid,
    lot_id: i64,
    source_type: &'a str,
    source_id: Uuid,
    quantity: Decimal,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    document_no: String,
    #[serde(default)]
    registered_at: Option<DateTime<Utc>>,
}

/// Posts the reservation to an ERP registration endpoint as JSON.
#[derive(Debug, Clone)]
pub struct HttpErpGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpErpGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("Failed to build ERP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ErpGateway for HttpErpGateway {
    #[instrument(skip(self, reservation), fields(reservation_id = %reservation.id))]
    async fn register_allocation(&self, reservation: &reservation::Model) -> RegistrationResult {
        let body = RegistrationRequest {
            reservation_id: reservation.id,
            lot_id: reservation.lot_id,
            source_type: reservation.source_type.into(),
            source_id: reservation.source_id,
            quantity: reservation.reserved_qty,
        };

        let response = match self.client.post(&self.endpoint).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "ERP registration request failed");
                return RegistrationResult::failed(format!("ERP unreachable: {}", e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "ERP rejected registration");
            return RegistrationResult::failed(format!("ERP returned {}: {}", status, text));
        }

        match response.json::<RegistrationResponse>().await {
            Ok(parsed) => {
                info!(document_no = %parsed.document_no, "ERP registration accepted");
                RegistrationResult::registered(
                    parsed.document_no,
                    parsed.registered_at.unwrap_or_else(Utc::now),
                )
            }
            Err(e) => RegistrationResult::failed(format!("Malformed ERP response: {}", e)),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Selects the gateway implementation for the configured environment.
pub fn build_gateway(cfg: &GatewayConfig) -> Result<Arc<dyn ErpGateway>, ServiceError> {
    match cfg.mode {
        GatewayMode::MockSuccess => Ok(Arc::new(MockSuccessGateway)),
        GatewayMode::MockFailure => Ok(Arc::new(match &cfg.failure_message {
            Some(message) => MockFailureGateway::new(message.clone()),
            None => MockFailureGateway::default(),
        })),
        GatewayMode::Http => {
            let endpoint = cfg.endpoint.clone().ok_or_else(|| {
                ServiceError::ValidationError("ERP gateway endpoint is required in http mode".into())
            })?;
            Ok(Arc::new(HttpErpGateway::new(
                endpoint,
                Duration::from_secs(cfg.timeout_secs),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::reservation::{ReservationStatus, SourceType};
    use rust_decimal_macros::dec;

    fn reservation() -> reservation::Model {
        reservation::Model {
            id: Uuid::new_v4(),
            lot_id: 1,
            source_type: SourceType::Order,
            source_id: Uuid::new_v4(),
            reserved_qty: dec!(5),
            status: ReservationStatus::Active,
            sap_document_no: None,
            sap_registered_at: None,
            confirmed_at: None,
            released_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn mock_success_issues_document_number() {
        let result = MockSuccessGateway.register_allocation(&reservation()).await;
        assert!(result.success);
        assert!(result.document_no.unwrap().starts_with("MOCK-"));
        assert!(result.registered_at.is_some());
    }

    #[tokio::test]
    async fn mock_failure_reports_message() {
        let result = MockFailureGateway::new("posting period closed")
            .register_allocation(&reservation())
            .await;
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("posting period closed"));
        assert!(result.document_no.is_none());
    }

    #[tokio::test]
    async fn unreachable_http_endpoint_is_a_failure_result() {
        let gateway = HttpErpGateway::new("http://127.0.0.1:9/register", Duration::from_secs(2))
            .expect("client builds");
        let result = gateway.register_allocation(&reservation()).await;
        assert!(!result.success);
        assert!(result.error_message.is_some());
    }

    #[test]
    fn build_gateway_by_mode() {
        let mut cfg = GatewayConfig::default();
        assert_eq!(build_gateway(&cfg).unwrap().name(), "mock-success");

        cfg.mode = GatewayMode::MockFailure;
        assert_eq!(build_gateway(&cfg).unwrap().name(), "mock-failure");

        cfg.mode = GatewayMode::Http;
        assert!(build_gateway(&cfg).is_err());
        cfg.endpoint = Some("https://erp.example.com/register".into());
        assert_eq!(build_gateway(&cfg).unwrap().name(), "http");
    }
}
