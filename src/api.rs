//! HTTP surface
//!
//! Thin axum handlers over the orchestrator and the pricing engine. Each
//! handler pulls the request apart, hands it to the domain, and renders
//! either the result or a `{status, message, timestamp}` error body.
//!
//! Routes:
//! - `POST /trips` creates and settles a trip (201)
//! - `GET /trips/user/:user_id` lists a rider's trips, newest first
//! - `POST /pricing/calculate` prices a trip without recording it. This is
//!   the endpoint `HttpPricingClient` calls when pricing runs remotely.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::SettlementError;
use crate::models::{FareBreakdown, TransportMode, TripRecord};
use crate::orchestrator::TripOrchestrator;
use crate::pricing_engine::PricingEngine;

/// Body of `POST /trips`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTripRequest {
    pub user_id: Uuid,
    /// Parsed by hand so an unknown mode is a 400 with a readable message.
    pub transport_type: String,
    pub distance_km: Decimal,
}

/// Body of `POST /pricing/calculate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateFareRequest {
    pub user_id: Uuid,
    pub transport_type: String,
    pub distance_km: Decimal,
    #[serde(default)]
    pub trip_count: u64,
    /// Defaults to now.
    pub requested_at: Option<DateTime<Utc>>,
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SettlementError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SettlementError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SettlementError::NotFound(_) => StatusCode::NOT_FOUND,
            SettlementError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SettlementError::Persistence(_) | SettlementError::InvalidConfig(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SettlementError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiError {
            status: status.as_u16(),
            message: self.to_string(),
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

fn bad_body(rejection: JsonRejection) -> SettlementError {
    SettlementError::InvalidInput(rejection.body_text())
}

/// State behind the pricing route.
#[derive(Clone)]
pub struct PricingState {
    pub engine: Arc<PricingEngine>,
    pub clock: Arc<dyn Clock>,
}

/// Create a new trip
pub async fn create_trip(
    State(orchestrator): State<Arc<TripOrchestrator>>,
    payload: Result<Json<CreateTripRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TripRecord>), SettlementError> {
    let Json(request) = payload.map_err(bad_body)?;
    let mode = TransportMode::from_str(&request.transport_type)?;
    let trip = orchestrator
        .create_trip(request.user_id, mode, request.distance_km)
        .await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

/// List a rider's trips, newest first
pub async fn trips_for_user(
    State(orchestrator): State<Arc<TripOrchestrator>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<TripRecord>>, SettlementError> {
    let rider_id = Uuid::parse_str(&user_id)
        .map_err(|_| SettlementError::InvalidInput(format!("'{user_id}' is not a valid user id")))?;
    let trips = orchestrator.list_trips_for_rider(rider_id).await?;
    Ok(Json(trips))
}

/// Price a trip without recording it
pub async fn calculate_fare(
    State(state): State<PricingState>,
    payload: Result<Json<CalculateFareRequest>, JsonRejection>,
) -> Result<Json<FareBreakdown>, SettlementError> {
    let Json(request) = payload.map_err(bad_body)?;
    let mode = TransportMode::from_str(&request.transport_type)?;
    let requested_at = request.requested_at.unwrap_or_else(|| state.clock.now());
    debug!(rider_id = %request.user_id, mode = %mode, "Fare calculation requested");

    let breakdown = state
        .engine
        .compute_fare(mode, request.distance_km, requested_at, request.trip_count)?;
    Ok(Json(breakdown))
}

pub fn trip_router(orchestrator: Arc<TripOrchestrator>) -> Router {
    Router::new()
        .route("/trips", post(create_trip))
        .route("/trips/user/:user_id", get(trips_for_user))
        .with_state(orchestrator)
}

pub fn pricing_router(engine: Arc<PricingEngine>) -> Router {
    Router::new()
        .route("/pricing/calculate", post(calculate_fare))
        .with_state(PricingState {
            engine,
            clock: Arc::new(SystemClock),
        })
}

/// Everything this service answers.
pub fn router(orchestrator: Arc<TripOrchestrator>, engine: Arc<PricingEngine>) -> Router {
    trip_router(orchestrator).merge(pricing_router(engine))
}
