// =============================================================================
// gateway/mod.rs — GET A FARE, NO MATTER WHAT
// =============================================================================
//
// The pricing gateway sits between settlement and the pricing engine. The
// engine may be in-process or a separate service behind HTTP; either way
// the gateway:
//
//   1. asks the circuit breaker for permission,
//   2. makes ONE call, bounded by a timeout,
//   3. accepts the answer only if it is a well-formed breakdown,
//   4. otherwise prices the trip at the flat fallback rate.
//
// `price_trip` has no error type. A pricing outage is logged and counted,
// and the trip is priced in degraded mode. Fallback fares carry no
// discount and no cap; they are a stand-in price, not an attempt to
// re-derive what the engine would have said.
// =============================================================================

pub mod http_client;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::SettlementError;
use crate::metrics::MetricsCollector;
use crate::models::{FareBreakdown, PricingRequest};
use crate::pricing_engine::PricingEngine;

pub use http_client::HttpPricingClient;

/// Why a single pricing call didn't produce a usable fare.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingCallError {
    #[error("pricing call timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("pricing engine answered with HTTP {0}")]
    Status(u16),
    #[error("malformed pricing response: {0}")]
    InvalidBody(String),
    #[error("pricing engine rejected the request: {0}")]
    Rejected(String),
}

/// Something that can turn a pricing request into a fare breakdown.
#[async_trait]
pub trait PricingBackend: Send + Sync {
    async fn quote(&self, request: &PricingRequest) -> Result<FareBreakdown, PricingCallError>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// The pricing engine living in this process.
pub struct LocalPricingBackend {
    engine: Arc<PricingEngine>,
}

impl LocalPricingBackend {
    pub fn new(engine: Arc<PricingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl PricingBackend for LocalPricingBackend {
    async fn quote(&self, request: &PricingRequest) -> Result<FareBreakdown, PricingCallError> {
        self.engine
            .quote(request)
            .map_err(|e| PricingCallError::Rejected(e.to_string()))
    }

    fn describe(&self) -> String {
        "local".to_string()
    }
}

/// Where a fare came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Engine,
    Fallback(FallbackReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The breaker was open; no call was attempted.
    BreakerOpen,
    /// The call was attempted and failed or timed out.
    CallFailed,
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceSource::Engine => write!(f, "engine"),
            PriceSource::Fallback(FallbackReason::BreakerOpen) => write!(f, "fallback(breaker-open)"),
            PriceSource::Fallback(FallbackReason::CallFailed) => write!(f, "fallback(call-failed)"),
        }
    }
}

/// A fare plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedFare {
    pub breakdown: FareBreakdown,
    pub source: PriceSource,
}

impl PricedFare {
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, PriceSource::Fallback(_))
    }
}

pub struct PricingGateway {
    backend: Arc<dyn PricingBackend>,
    breaker: Arc<CircuitBreaker>,
    fallback_rate_per_km: Decimal,
    call_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl PricingGateway {
    pub fn new(
        backend: Arc<dyn PricingBackend>,
        breaker: Arc<CircuitBreaker>,
        fallback_rate_per_km: Decimal,
        call_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            backend,
            breaker,
            fallback_rate_per_km,
            call_timeout,
            metrics,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Price a trip. Never fails.
    pub async fn price_trip(&self, request: &PricingRequest) -> PricedFare {
        let Some(permit) = self.breaker.try_acquire() else {
            debug!(
                rider_id = %request.rider_id,
                breaker = self.breaker.name(),
                "Pricing breaker OPEN — skipping the engine"
            );
            return self.fallback(request, FallbackReason::BreakerOpen, None);
        };

        let outcome = match tokio::time::timeout(self.call_timeout, self.backend.quote(request)).await {
            Ok(Ok(breakdown)) if breakdown.is_well_formed() => Ok(breakdown),
            Ok(Ok(breakdown)) => Err(PricingCallError::InvalidBody(format!(
                "inconsistent breakdown: base={} discount={} final={}",
                breakdown.base_fare, breakdown.discount, breakdown.final_fare
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PricingCallError::Timeout(self.call_timeout)),
        };

        match outcome {
            Ok(breakdown) => {
                permit.succeeded();
                self.metrics.increment_engine_prices();
                PricedFare {
                    breakdown,
                    source: PriceSource::Engine,
                }
            }
            Err(call_error) => {
                if permit.failed() {
                    self.metrics.increment_circuit_breaker_trips();
                }
                self.fallback(request, FallbackReason::CallFailed, Some(call_error))
            }
        }
    }

    /// The degraded-mode fare: `fallback_rate × distance`, nothing else.
    ///
    /// Saturates at `Decimal::MAX` when the product overflows. Orchestrated
    /// trips never get near that; their distance is bounded before pricing.
    pub fn fallback_fare(&self, distance_km: Decimal) -> FareBreakdown {
        let fare = match self.fallback_rate_per_km.checked_mul(distance_km) {
            Some(fare) => fare,
            None => {
                error!(
                    rate = %self.fallback_rate_per_km,
                    distance_km = %distance_km,
                    "Fallback fare overflowed, saturating"
                );
                Decimal::MAX
            }
        };
        FareBreakdown::flat(fare)
    }

    fn fallback(
        &self,
        request: &PricingRequest,
        reason: FallbackReason,
        call_error: Option<PricingCallError>,
    ) -> PricedFare {
        let upstream = SettlementError::UpstreamUnavailable(match &call_error {
            Some(e) => e.to_string(),
            None => format!("breaker '{}' is open", self.breaker.name()),
        });
        let breakdown = self.fallback_fare(request.distance_km);
        warn!(
            rider_id = %request.rider_id,
            backend = %self.backend.describe(),
            error = %upstream,
            fallback_rate = %self.fallback_rate_per_km,
            fare = %breakdown.final_fare,
            "Pricing unavailable — applying fallback rate"
        );
        self.metrics.increment_fallback_prices();
        PricedFare {
            breakdown,
            source: PriceSource::Fallback(reason),
        }
    }
}
