// =============================================================================
// orchestrator.rs — ONE TRIP, START TO SETTLED
// =============================================================================
//
// create_trip runs the settlement sequence:
//
//   1. validate, stamp a fresh CREATED record from the clock
//   2. count the rider's trips (the loyalty signal)
//   3. price through the gateway (cannot fail; may be a fallback fare)
//   4. FIRST WRITE: insert. Failure here aborts, nothing is stored.
//   5. charge billing with the final fare
//   6. PAID or FAILED, stamp settled_at, SECOND WRITE: update.
//
// Steps 5 and 6 run on their own task. Once the first write lands, the
// trip gets settled even if whoever called create_trip goes away.
//
// Between the two writes the trip sits durably in CREATED with a fare and
// no outcome. If the second write fails, or the process dies in between,
// it stays that way. Nothing here sweeps those up.
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::BillingCollaborator;
use crate::clock::Clock;
use crate::error::{SettlementError, SettlementResult};
use crate::gateway::PricingGateway;
use crate::metrics::MetricsCollector;
use crate::models::{validate_distance, PricingRequest, TransportMode, TripRecord};
use crate::store::TripStore;

pub struct TripOrchestrator {
    gateway: Arc<PricingGateway>,
    store: Arc<dyn TripStore>,
    billing: Arc<dyn BillingCollaborator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl TripOrchestrator {
    pub fn new(
        gateway: Arc<PricingGateway>,
        store: Arc<dyn TripStore>,
        billing: Arc<dyn BillingCollaborator>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            gateway,
            store,
            billing,
            clock,
            metrics,
        }
    }

    /// Price, persist and settle a new trip.
    ///
    /// Pricing outages never surface here. Errors are `InvalidInput` for a
    /// bad distance and `Persistence` when either write fails.
    pub async fn create_trip(
        &self,
        rider_id: Uuid,
        mode: TransportMode,
        distance_km: Decimal,
    ) -> SettlementResult<TripRecord> {
        let distance_km = validate_distance(distance_km)?;
        let mut trip = TripRecord::new(rider_id, mode, distance_km, self.clock.now());

        let trip_count = self.store.count_by_rider(rider_id).await.map_err(|e| {
            self.metrics.increment_persistence_failures();
            error!(rider_id = %rider_id, error = %e, "Could not read rider trip count");
            SettlementError::from(e)
        })?;

        let request = PricingRequest {
            rider_id,
            transport_type: mode,
            distance_km,
            trip_count,
            requested_at: trip.created_at,
        };
        let priced = self.gateway.price_trip(&request).await;
        trip.apply_fare(&priced.breakdown);

        if let Err(e) = self.store.insert(&trip).await {
            self.metrics.increment_persistence_failures();
            error!(trip_id = %trip.id, rider_id = %rider_id, error = %e, "First write failed, trip dropped");
            return Err(e.into());
        }
        self.metrics.increment_created();
        info!(
            trip_id = %trip.id,
            rider_id = %rider_id,
            mode = %mode,
            fare = %priced.breakdown.final_fare,
            source = %priced.source,
            degraded = priced.is_degraded(),
            "Trip created"
        );

        let settle = tokio::spawn(settle_trip(
            trip,
            Arc::clone(&self.store),
            Arc::clone(&self.billing),
            Arc::clone(&self.clock),
            Arc::clone(&self.metrics),
        ));

        match settle.await {
            Ok(result) => result,
            Err(join_error) => {
                self.metrics.increment_persistence_failures();
                error!(rider_id = %rider_id, error = %join_error, "Settlement task did not finish");
                Err(SettlementError::Persistence(format!(
                    "settlement task aborted: {join_error}"
                )))
            }
        }
    }

    /// A rider's trips, newest first. No trips is `NotFound`, not an empty list.
    pub async fn list_trips_for_rider(&self, rider_id: Uuid) -> SettlementResult<Vec<TripRecord>> {
        let trips = self.store.find_by_rider(rider_id).await.map_err(|e| {
            self.metrics.increment_persistence_failures();
            error!(rider_id = %rider_id, error = %e, "Could not load rider trips");
            SettlementError::from(e)
        })?;

        if trips.is_empty() {
            return Err(SettlementError::NotFound(format!(
                "no trips found for rider {rider_id}"
            )));
        }
        Ok(trips)
    }
}

/// Steps 5 and 6: charge, then record the outcome.
async fn settle_trip(
    mut trip: TripRecord,
    store: Arc<dyn TripStore>,
    billing: Arc<dyn BillingCollaborator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
) -> SettlementResult<TripRecord> {
    let amount = trip.final_fare.unwrap_or(Decimal::ZERO);
    let billed = billing.charge(trip.id, trip.rider_id, amount).await;
    trip.settle(billed, clock.now())?;

    if let Err(e) = store.update(&trip).await {
        metrics.increment_persistence_failures();
        error!(
            trip_id = %trip.id,
            status = %trip.status,
            error = %e,
            "Second write failed, trip left in CREATED"
        );
        return Err(e.into());
    }

    if billed {
        metrics.increment_paid();
        info!(trip_id = %trip.id, amount = %amount, "Trip settled PAID");
    } else {
        metrics.increment_failed();
        warn!(trip_id = %trip.id, amount = %amount, "Trip settled FAILED");
    }
    Ok(trip)
}
