//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Once;

use crate::error::{AppError, Result};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Sync Metrics
    pub static ref SYNC_CYCLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("teasync_sync_cycles_total", "Total number of sync cycles"),
        &["trigger", "outcome"]
    ).expect("metric can be created");
    pub static ref SYNC_CYCLE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "teasync_sync_cycle_duration_seconds",
            "Sync cycle duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["trigger"]
    ).expect("metric can be created");
    pub static ref SYNC_ITEMS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("teasync_sync_items_total", "Total number of queue items processed"),
        &["resource", "operation", "result"]
    ).expect("metric can be created");
    pub static ref SYNC_QUEUE_PENDING: IntGauge = IntGauge::new(
        "teasync_sync_queue_pending",
        "Queue items waiting to be sent"
    ).expect("metric can be created");
    pub static ref PULLED_ENTITIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("teasync_pulled_entities_total", "Total number of entities pulled from the remote"),
        &["resource", "result"]
    ).expect("metric can be created");

    // Connectivity Metrics
    pub static ref CONNECTIVITY_ONLINE: IntGauge = IntGauge::new(
        "teasync_connectivity_online",
        "1 when the remote is reachable"
    ).expect("metric can be created");
    pub static ref CONNECTIVITY_TRANSITIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("teasync_connectivity_transitions_total", "Total number of connectivity changes"),
        &["state"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("teasync_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("teasync_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_SWEPT_LAST: IntGaugeVec = IntGaugeVec::new(
        Opts::new("teasync_cache_swept_last", "Entries removed by the last expiry sweep"),
        &["cache_name"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(SYNC_CYCLES_TOTAL.clone()))
            .expect("SYNC_CYCLES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SYNC_CYCLE_DURATION_SECONDS.clone()))
            .expect("SYNC_CYCLE_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(SYNC_ITEMS_TOTAL.clone()))
            .expect("SYNC_ITEMS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SYNC_QUEUE_PENDING.clone()))
            .expect("SYNC_QUEUE_PENDING can be registered");
        REGISTRY
            .register(Box::new(PULLED_ENTITIES_TOTAL.clone()))
            .expect("PULLED_ENTITIES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CONNECTIVITY_ONLINE.clone()))
            .expect("CONNECTIVITY_ONLINE can be registered");
        REGISTRY
            .register(Box::new(CONNECTIVITY_TRANSITIONS_TOTAL.clone()))
            .expect("CONNECTIVITY_TRANSITIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("CACHE_HITS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("CACHE_MISSES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_SWEPT_LAST.clone()))
            .expect("CACHE_SWEPT_LAST can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

/// Render every registered metric in Prometheus text format
pub fn gather() -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to encode metrics: {}", e)))
}
