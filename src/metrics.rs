// ═══════════════════════════════════════════════════════════════
// METRICS COLLECTOR - How many trips, how many paid, how often we
// had to guess the fare
// ═══════════════════════════════════════════════════════════════
//
// Atomic counters, no locks. A small axum server on its own port serves
// the snapshot as JSON at GET /metrics so ops can see when the pricing
// engine has been replaced by the fallback rate for the last hour.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot};

/// The metrics snapshot - what gets serialized to JSON
#[derive(Debug, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub trips_created: u64,
    pub trips_paid: u64,
    pub trips_failed: u64,
    pub persistence_failures: u64,
    pub engine_prices: u64,
    pub fallback_prices: u64,
    pub circuit_breaker_trips: u64,
    pub uptime_seconds: u64,
    pub trips_per_minute: f64,
    pub pricing_breaker: Option<CircuitBreakerSnapshot>,
    pub status: String,
}

#[derive(Default)]
struct Counters {
    trips_created: AtomicU64,
    trips_paid: AtomicU64,
    trips_failed: AtomicU64,
    persistence_failures: AtomicU64,
    engine_prices: AtomicU64,
    fallback_prices: AtomicU64,
    circuit_breaker_trips: AtomicU64,
}

pub struct MetricsCollector {
    counters: Counters,
    breaker: parking_lot::RwLock<Option<Arc<CircuitBreaker>>>,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            breaker: parking_lot::RwLock::new(None),
            start_time: Instant::now(),
        }
    }

    /// Include this breaker's state in every snapshot.
    pub fn watch_breaker(&self, breaker: Arc<CircuitBreaker>) {
        *self.breaker.write() = Some(breaker);
    }

    pub fn increment_created(&self) {
        self.counters.trips_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_paid(&self) {
        self.counters.trips_paid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.counters.trips_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_persistence_failures(&self) {
        self.counters.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_engine_prices(&self) {
        self.counters.engine_prices.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fallback_prices(&self) {
        self.counters.fallback_prices.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_circuit_breaker_trips(&self) {
        self.counters.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        let uptime = self.start_time.elapsed().as_secs();
        let trips_created = c.trips_created.load(Ordering::Relaxed);
        let trips_per_minute = if uptime > 0 {
            (trips_created as f64 / uptime as f64) * 60.0
        } else {
            0.0
        };
        let pricing_breaker = self.breaker.read().as_ref().map(|b| b.snapshot());
        let status = match &pricing_breaker {
            Some(b) if b.state != crate::circuit_breaker::CircuitState::Closed => "degraded",
            _ => "operational",
        };

        MetricsSnapshot {
            trips_created,
            trips_paid: c.trips_paid.load(Ordering::Relaxed),
            trips_failed: c.trips_failed.load(Ordering::Relaxed),
            persistence_failures: c.persistence_failures.load(Ordering::Relaxed),
            engine_prices: c.engine_prices.load(Ordering::Relaxed),
            fallback_prices: c.fallback_prices.load(Ordering::Relaxed),
            circuit_breaker_trips: c.circuit_breaker_trips.load(Ordering::Relaxed),
            uptime_seconds: uptime,
            trips_per_minute,
            pricing_breaker,
            status: status.to_string(),
        }
    }
}

pub fn metrics_router(metrics: Arc<MetricsCollector>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(metrics)
}

async fn get_metrics(State(metrics): State<Arc<MetricsCollector>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

/// Serve the metrics snapshot as JSON until shutdown.
pub async fn run_metrics_server(
    bind: String,
    metrics: Arc<MetricsCollector>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on {}: {}", bind, e);
            return;
        }
    };

    info!("📊 Metrics server listening on http://{}/metrics", bind);

    let mut shutdown = shutdown.clone();
    let served = axum::serve(listener, metrics_router(metrics))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
            info!("Metrics server: shutting down");
        })
        .await;
    if let Err(e) = served {
        error!("Metrics server error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerSettings;
    use std::time::Duration;

    #[test]
    fn test_counters_show_up_in_snapshot() {
        let metrics = MetricsCollector::new();
        metrics.increment_created();
        metrics.increment_created();
        metrics.increment_paid();
        metrics.increment_fallback_prices();

        let snap = metrics.snapshot();
        assert_eq!(snap.trips_created, 2);
        assert_eq!(snap.trips_paid, 1);
        assert_eq!(snap.trips_failed, 0);
        assert_eq!(snap.fallback_prices, 1);
        assert!(snap.pricing_breaker.is_none());
        assert_eq!(snap.status, "operational");
    }

    #[test]
    fn test_open_breaker_marks_service_degraded() {
        let metrics = MetricsCollector::new();
        let breaker = Arc::new(CircuitBreaker::new(
            "pricing",
            &BreakerSettings {
                failure_threshold: 1,
                ..BreakerSettings::default()
            },
        ));
        metrics.watch_breaker(Arc::clone(&breaker));
        breaker.record_failure();

        let snap = metrics.snapshot();
        assert_eq!(snap.status, "degraded");
        assert_eq!(snap.pricing_breaker.map(|b| b.total_trips), Some(1));
    }

    #[tokio::test]
    async fn test_metrics_served_over_http_until_shutdown() {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.increment_created();
        metrics.increment_fallback_prices();

        // Reserve a port, release it, and hand the address to the server.
        let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = tokio::spawn({
            let metrics = Arc::clone(&metrics);
            async move { run_metrics_server(addr.to_string(), metrics, &mut shutdown_rx).await }
        });

        let client = reqwest::Client::new();
        let url = format!("http://{addr}/metrics");
        let mut body = None;
        for _ in 0..50 {
            if let Ok(resp) = client.get(&url).send().await {
                assert_eq!(resp.status(), reqwest::StatusCode::OK);
                body = Some(resp.json::<serde_json::Value>().await.unwrap());
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let body = body.expect("metrics server never answered");
        assert_eq!(body["trips_created"], 1);
        assert_eq!(body["fallback_prices"], 1);
        assert_eq!(body["status"], "operational");

        let missing = client.get(format!("http://{addr}/nope")).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("metrics server ignored shutdown")
            .unwrap();
    }
}
