//! # Ingestion API Forwarding
//!
//! Delivers every extracted product to the downstream product-card API as a
//! JSON `POST`.
//!
//! ## Payload
//!
//! ```json
//! {
//!   "product_info": "Артикул: ...\nНаименование: ...",
//!   "ean": "<product code>",
//!   "source": "<site name>",
//!   "template_id": 0,
//!   "img": "https://.../1.jpg, https://.../2.jpg",
//!   "parsing_result": {},
//!   "check_result": {}
//! }
//! ```
//!
//! ## Delivery Semantics
//!
//! A delivery counts as accepted only when the API answers `200 OK`. Any
//! other status, a timeout or a transport error is logged and reported as a
//! failure, so the product stays eligible for the next crawl run.
//!
//! ## Environment Configuration
//!
//! `API_URL` sets the endpoint and `API_TIMEOUT` bounds each request.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{error, info};

use crate::models::ForwardPayload;
use crate::traits::Forwarder;

/// HTTP client for the product-card ingestion API.
///
/// ## Fields
///
/// - `client`: Shared HTTP client with the request timeout applied
/// - `api_url`: Endpoint every payload is posted to
pub struct ApiForwarder {
    client: Client,
    api_url: String,
}

impl ApiForwarder {
    /// Creates a forwarder posting to `api_url`.
    ///
    /// ## Errors
    ///
    /// Fails only if the underlying HTTP client cannot be built.
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build ingestion API client")?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
        })
    }
}

#[async_trait]
impl Forwarder for ApiForwarder {
    /// Posts `payload` and reports whether the API accepted it.
    async fn forward(&self, payload: &ForwardPayload) -> bool {
        let response = match self.client.post(&self.api_url).json(payload).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to send product {} to API: {}", payload.ean, e);
                return false;
            }
        };

        let status = response.status();
        if status == StatusCode::OK {
            info!("Product {} accepted by API", payload.ean);
            true
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(
                "API rejected product {} with status {}: {}",
                payload.ean, status, body
            );
            false
        }
    }
}

impl Clone for ApiForwarder {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            api_url: self.api_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode as Status;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn serve(status: Status) -> (String, Received) {
        let received: Received = Arc::default();
        let router = Router::new()
            .route(
                "/api/product-card",
                post(
                    move |State(received): State<Received>, Json(body): Json<serde_json::Value>| async move {
                        received.lock().unwrap().push(body);
                        status
                    },
                ),
            )
            .with_state(Arc::clone(&received));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}/api/product-card"), received)
    }

    fn payload() -> ForwardPayload {
        ForwardPayload::new(
            "Артикул: 42\nНаименование: Чайник",
            "42",
            &["https://img.example/1.jpg".to_string()],
            "TestShop",
        )
    }

    #[tokio::test]
    async fn accepted_on_200() {
        let (url, received) = serve(Status::OK).await;
        let forwarder = ApiForwarder::new(&url, Duration::from_secs(5)).unwrap();

        assert!(forwarder.forward(&payload()).await);

        let bodies = received.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["ean"], "42");
        assert_eq!(bodies[0]["source"], "TestShop");
        assert_eq!(bodies[0]["img"], "https://img.example/1.jpg");
    }

    #[tokio::test]
    async fn other_success_codes_are_failures() {
        let (url, _) = serve(Status::CREATED).await;
        let forwarder = ApiForwarder::new(&url, Duration::from_secs(5)).unwrap();

        assert!(!forwarder.forward(&payload()).await);
    }

    #[tokio::test]
    async fn server_error_is_failure() {
        let (url, received) = serve(Status::INTERNAL_SERVER_ERROR).await;
        let forwarder = ApiForwarder::new(&url, Duration::from_secs(5)).unwrap();

        assert!(!forwarder.forward(&payload()).await);
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_api_is_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let forwarder =
            ApiForwarder::new(&format!("http://{addr}/api"), Duration::from_millis(500)).unwrap();

        assert!(!forwarder.forward(&payload()).await);
    }
}
