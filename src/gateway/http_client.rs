// =============================================================================
// gateway/http_client.rs — THE PRICING ENGINE, OVER THE WIRE
// =============================================================================
//
// When pricing runs as its own service, the gateway reaches it with a JSON
// POST to {base}/pricing/calculate. Every way that can go wrong collapses
// into a `PricingCallError`:
//
//   - connect/read failures           -> Transport (or Timeout)
//   - any non-2xx status              -> Status(code)
//   - a 2xx whose body isn't a fare   -> InvalidBody
//
// The gateway treats all of them the same way: one more breaker failure,
// one more fallback fare.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{PricingBackend, PricingCallError};
use crate::models::{FareBreakdown, PricingRequest};

pub struct HttpPricingClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpPricingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent("TripSettlementEngine/1.0 (pricing-gateway)")
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/pricing/calculate", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PricingBackend for HttpPricingClient {
    async fn quote(&self, request: &PricingRequest) -> Result<FareBreakdown, PricingCallError> {
        debug!(
            endpoint = %self.endpoint,
            rider_id = %request.rider_id,
            mode = %request.transport_type,
            distance_km = %request.distance_km,
            "Calling remote pricing engine"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PricingCallError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        serde_json::from_str::<FareBreakdown>(&body)
            .map_err(|e| PricingCallError::InvalidBody(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("http:{}", self.endpoint())
    }
}

impl HttpPricingClient {
    fn classify(&self, error: reqwest::Error) -> PricingCallError {
        if error.is_timeout() {
            PricingCallError::Timeout(self.timeout)
        } else {
            PricingCallError::Transport(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use crate::config::FareRules;
    use crate::gateway::tests::request;
    use crate::pricing_engine::PricingEngine;
    use axum::{http::StatusCode, routing::post, Router};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_quotes_from_real_pricing_endpoint() {
        let engine = Arc::new(PricingEngine::new(FareRules {
            off_peak_enabled: true,
            loyalty_enabled: false,
            ..FareRules::default()
        }));
        let base = serve(api::pricing_router(engine)).await;
        let client = HttpPricingClient::new(&base, Duration::from_secs(2)).unwrap();

        // request() is stamped at 22:00 UTC: off-peak under the default window.
        let fare = client.quote(&request(dec!(12))).await.unwrap();
        assert_eq!(fare.base_fare, dec!(1200.00));
        assert_eq!(fare.discount, dec!(120.00));
        assert_eq!(fare.final_fare, dec!(1080.00));
        assert!(fare.off_peak_applied);
    }

    #[tokio::test]
    async fn test_server_error_is_status_failure() {
        let router = Router::new().route(
            "/pricing/calculate",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down for maintenance") }),
        );
        let base = serve(router).await;
        let client = HttpPricingClient::new(&base, Duration::from_secs(2)).unwrap();
        assert_eq!(
            client.quote(&request(dec!(3))).await,
            Err(PricingCallError::Status(503))
        );
    }

    #[tokio::test]
    async fn test_garbage_body_is_invalid() {
        let router = Router::new().route("/pricing/calculate", post(|| async { "{\"fare\": \"cheap\"}" }));
        let base = serve(router).await;
        let client = HttpPricingClient::new(&base, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            client.quote(&request(dec!(3))).await,
            Err(PricingCallError::InvalidBody(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let router = Router::new().route(
            "/pricing/calculate",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "{}"
            }),
        );
        let base = serve(router).await;
        let client = HttpPricingClient::new(&base, Duration::from_millis(50)).unwrap();
        assert!(matches!(
            client.quote(&request(dec!(3))).await,
            Err(PricingCallError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_transport_failure() {
        // Bind then drop to get a port nobody is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpPricingClient::new(&format!("http://{addr}/"), Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint(), format!("http://{addr}/pricing/calculate"));
        assert!(matches!(
            client.quote(&request(dec!(3))).await,
            Err(PricingCallError::Transport(_)) | Err(PricingCallError::Timeout(_))
        ));
    }
}
