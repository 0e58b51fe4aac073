//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Inbound Metrics
    pub static ref ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("activityrelay_activities_received_total", "Total number of activities accepted at the inbox"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref POLICY_REJECTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("activityrelay_policy_rejections_total", "Total number of inbound requests rejected by policy"),
        &["rule"]
    ).expect("metric can be created");
    pub static ref INBOX_REQUEST_DURATION_SECONDS: prometheus::Histogram = prometheus::Histogram::with_opts(
        HistogramOpts::new(
            "activityrelay_inbox_request_duration_seconds",
            "Inbox request duration in seconds"
        ).buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).expect("metric can be created");

    // Delivery Metrics
    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("activityrelay_deliveries_total", "Total number of outbound delivery attempts"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref DELIVERIES_IN_FLIGHT: IntGauge = IntGauge::new(
        "activityrelay_deliveries_in_flight",
        "Current number of outbound deliveries holding a concurrency permit"
    ).expect("metric can be created");
    pub static ref DELIVERY_DURATION_SECONDS: prometheus::Histogram = prometheus::Histogram::with_opts(
        HistogramOpts::new(
            "activityrelay_delivery_duration_seconds",
            "Outbound delivery duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).expect("metric can be created");

    // Relay State Metrics
    pub static ref DEDUP_HITS_TOTAL: prometheus::IntCounter = prometheus::IntCounter::new(
        "activityrelay_dedup_hits_total",
        "Total number of relays suppressed by the dedup cache"
    ).expect("metric can be created");
    pub static ref SUBSCRIBERS: IntGauge = IntGauge::new(
        "activityrelay_subscribers",
        "Current number of registered subscriber inboxes"
    ).expect("metric can be created");
    pub static ref PAUSED_DESTINATIONS: IntGauge = IntGauge::new(
        "activityrelay_destinations_with_errors",
        "Current number of destinations with a recorded delivery failure"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("activityrelay_errors_total", "Total number of error responses"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; registration happens on the first call.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(ACTIVITIES_RECEIVED.clone()))
            .expect("ACTIVITIES_RECEIVED can be registered");
        REGISTRY
            .register(Box::new(POLICY_REJECTIONS.clone()))
            .expect("POLICY_REJECTIONS can be registered");
        REGISTRY
            .register(Box::new(INBOX_REQUEST_DURATION_SECONDS.clone()))
            .expect("INBOX_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(DELIVERIES_TOTAL.clone()))
            .expect("DELIVERIES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(DELIVERIES_IN_FLIGHT.clone()))
            .expect("DELIVERIES_IN_FLIGHT can be registered");
        REGISTRY
            .register(Box::new(DELIVERY_DURATION_SECONDS.clone()))
            .expect("DELIVERY_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(DEDUP_HITS_TOTAL.clone()))
            .expect("DEDUP_HITS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SUBSCRIBERS.clone()))
            .expect("SUBSCRIBERS can be registered");
        REGISTRY
            .register(Box::new(PAUSED_DESTINATIONS.clone()))
            .expect("PAUSED_DESTINATIONS can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
