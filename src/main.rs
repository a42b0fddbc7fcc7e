// ████████╗██████╗ ██╗██████╗
// ╚══██╔══╝██╔══██╗██║██╔══██╗
//    ██║   ██████╔╝██║██████╔╝
//    ██║   ██╔══██╗██║██╔═══╝
//    ██║   ██║  ██║██║██║
//    ╚═╝   ╚═╝  ╚═╝╚═╝╚═╝
//
// S E T T L E M E N T   E N G I N E
//
// Prices public-transport trips, records them, charges the rider, and
// keeps doing all three when the pricing engine is on fire.

mod api;
mod billing;
mod circuit_breaker;
mod clock;
mod config;
mod error;
mod gateway;
mod metrics;
mod models;
mod orchestrator;
mod pricing_engine;
mod store;

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::billing::{BillingCollaborator, InMemoryPassLedger, PassDebitBilling, StubBilling};
use crate::circuit_breaker::CircuitBreaker;
use crate::clock::SystemClock;
use crate::config::{BillingMode, Config};
use crate::gateway::{HttpPricingClient, LocalPricingBackend, PricingBackend, PricingGateway};
use crate::metrics::MetricsCollector;
use crate::orchestrator::TripOrchestrator;
use crate::pricing_engine::PricingEngine;
use crate::store::{InMemoryTripStore, RedisTripStore, TripStore};

fn print_banner() {
    let banner = r#"

    ╔══════════════════════════════════════════════════════════════════╗
    ║                                                                  ║
    ║        ████████╗██████╗ ██╗██████╗                               ║
    ║        ╚══██╔══╝██╔══██╗██║██╔══██╗                              ║
    ║           ██║   ██████╔╝██║██████╔╝                              ║
    ║           ██║   ██╔══██╗██║██╔═══╝                               ║
    ║           ██║   ██║  ██║██║██║                                   ║
    ║           ╚═╝   ╚═╝  ╚═╝╚═╝╚═╝                                   ║
    ║                                                                  ║
    ║              🚌  TRIP SETTLEMENT ENGINE  🚆                      ║
    ║                                                                  ║
    ║   Modes:      BUS | BRT | TER                                    ║
    ║   Pricing:    Off-peak + Loyalty + Daily cap                     ║
    ║   Resilience: Circuit breaker + flat fallback fare               ║
    ║   Storage:    In-memory or Redis                                 ║
    ║                                                                  ║
    ╚══════════════════════════════════════════════════════════════════╝

    "#;
    println!("{}", banner);
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    print_banner();

    info!("🚌 TRIP SETTLEMENT ENGINE initializing...");

    let config = Config::from_env();
    config.validate().context("configuration rejected")?;
    info!(
        http_bind = %config.http_bind,
        metrics_bind = %config.metrics_bind,
        billing = %config.billing_mode,
        "✅ Configuration loaded"
    );

    let metrics = Arc::new(MetricsCollector::new());
    let clock = Arc::new(SystemClock);
    let engine = Arc::new(PricingEngine::new(config.fare_rules.clone()));
    info!(
        base_rate = %engine.rules().base_rate_per_km,
        daily_cap = %engine.rules().daily_cap,
        "✅ Pricing engine loaded"
    );

    // ═══════════════════════════════════════════
    // PRICING GATEWAY
    // ═══════════════════════════════════════════
    let backend: Arc<dyn PricingBackend> = match &config.pricing_url {
        Some(url) => Arc::new(
            HttpPricingClient::new(url, config.pricing_timeout)
                .context("building pricing HTTP client")?,
        ),
        None => Arc::new(LocalPricingBackend::new(Arc::clone(&engine))),
    };
    let breaker = Arc::new(CircuitBreaker::new("pricing", &config.breaker));
    metrics.watch_breaker(Arc::clone(&breaker));
    info!(backend = %backend.describe(), "✅ Pricing gateway online");

    let gateway = Arc::new(PricingGateway::new(
        backend,
        breaker,
        config.fallback_rate_per_km,
        config.pricing_timeout,
        Arc::clone(&metrics),
    ));

    // ═══════════════════════════════════════════
    // STORE + BILLING
    // ═══════════════════════════════════════════
    let store: Arc<dyn TripStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisTripStore::connect(url, config.redis_key_prefix.clone())
                .await
                .context("connecting to Redis")?,
        ),
        None => {
            warn!("No REDIS_URL set — trips live in memory and die with the process");
            Arc::new(InMemoryTripStore::new())
        }
    };

    let billing: Arc<dyn BillingCollaborator> = match config.billing_mode {
        BillingMode::Stub => Arc::new(StubBilling),
        BillingMode::Pass => {
            let ledger = Arc::new(InMemoryPassLedger::new(Some(config.pass_opening_balance)));
            Arc::new(PassDebitBilling::new(ledger))
        }
    };

    let orchestrator = Arc::new(TripOrchestrator::new(
        gateway,
        store,
        billing,
        clock,
        Arc::clone(&metrics),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ═══════════════════════════════════════════
    // SPAWN HTTP API
    // ═══════════════════════════════════════════
    let app = api::router(orchestrator, engine);
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("binding HTTP listener on {}", config.http_bind))?;
    let mut api_shutdown = shutdown_rx.clone();
    let api_handle = tokio::spawn(async move {
        info!("🌐 HTTP API: ONLINE");
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await;
        if let Err(e) = served {
            error!("🌐 HTTP API error: {}", e);
        }
        info!("🌐 HTTP API: OFFLINE");
    });

    // ═══════════════════════════════════════════
    // SPAWN METRICS SERVER
    // ═══════════════════════════════════════════
    let metrics_bind = config.metrics_bind.clone();
    let metrics_for_server = Arc::clone(&metrics);
    let mut metrics_shutdown = shutdown_rx.clone();
    let metrics_handle = tokio::spawn(async move {
        metrics::run_metrics_server(metrics_bind, metrics_for_server, &mut metrics_shutdown).await;
        info!("📊 Metrics server: OFFLINE");
    });

    info!("═══════════════════════════════════════════════════════");
    info!("  🟢 ALL SYSTEMS ONLINE - TRIP SETTLEMENT ENGINE ACTIVE");
    info!("  🌐 API at http://{}", config.http_bind);
    info!("  📊 Metrics at http://{}/metrics", config.metrics_bind);
    info!("  ⚡ Press Ctrl+C for graceful shutdown");
    info!("═══════════════════════════════════════════════════════");

    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("🛑 Shutdown signal received!");
            let _ = shutdown_tx.send(true);
        }
        Err(err) => {
            error!("❌ Signal listener error: {}", err);
            let _ = shutdown_tx.send(true);
        }
    }

    info!("⏳ Waiting for tasks to complete (timeout: 10s)...");
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        let _ = tokio::join!(api_handle, metrics_handle);
    })
    .await;

    let snapshot = metrics.snapshot();
    info!(
        created = snapshot.trips_created,
        paid = snapshot.trips_paid,
        failed = snapshot.trips_failed,
        fallback_prices = snapshot.fallback_prices,
        "💀 TRIP SETTLEMENT ENGINE: OFFLINE"
    );
    Ok(())
}
