//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the attendance service using
//! Prometheus metrics.

use crate::error::AttendanceError;
use crate::types::{ParticipationState, PromotionResult};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the attendance service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// RSVP request metrics
    rsvp_metrics: RsvpMetrics,

    /// Waitlist promotion metrics
    promotion_metrics: PromotionMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Published events by type and status
    pub events_published_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// RSVP request metrics
#[derive(Clone)]
pub struct RsvpMetrics {
    /// Requests by desired and resulting state
    pub requests_total: IntCounterVec,

    /// Failed requests by desired state and error code
    pub failures_total: IntCounterVec,

    /// Conflicting transaction attempts by operation
    pub transaction_conflicts_total: IntCounterVec,
}

/// Waitlist promotion metrics
#[derive(Clone)]
pub struct PromotionMetrics {
    /// Promotion attempts by result
    pub promotions_total: IntCounterVec,

    /// Post-commit auto-promotions that failed and were left to the sweeper
    pub auto_promotion_failures_total: IntCounter,

    /// Sweeper passes
    pub sweeps_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// RSVP processing time including conflict retries
    pub rsvp_duration: Histogram,

    /// Other operation durations
    pub operation_duration: HistogramVec,
}

/// Counter totals exposed on the stats endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub rsvp_requests: u64,
    pub rsvp_failures: u64,
    pub transaction_conflicts: u64,
    pub promotions: u64,
    pub auto_promotion_failures: u64,
    pub events_failed: u64,
    pub sweeps: u64,
    pub uptime_seconds: i64,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with a custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let rsvp_metrics = RsvpMetrics::new(&registry)?;
        let promotion_metrics = PromotionMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            rsvp_metrics,
            promotion_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn rsvp(&self) -> &RsvpMetrics {
        &self.rsvp_metrics
    }

    pub fn promotion(&self) -> &PromotionMetrics {
        &self.promotion_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a completed RSVP request
    pub fn record_rsvp(
        &self,
        desired: ParticipationState,
        resulting: ParticipationState,
        duration: Duration,
    ) {
        self.rsvp_metrics
            .requests_total
            .with_label_values(&[desired.as_str(), resulting.as_str()])
            .inc();

        self.performance_metrics
            .rsvp_duration
            .observe(duration.as_secs_f64());
    }

    /// Record an RSVP request that returned an error
    pub fn record_rsvp_failure(&self, desired: ParticipationState, error: &AttendanceError) {
        self.rsvp_metrics
            .failures_total
            .with_label_values(&[desired.as_str(), error.code()])
            .inc();
    }

    /// Record a transaction attempt that lost an optimistic race
    pub fn record_transaction_conflict(&self, operation: &str) {
        self.rsvp_metrics
            .transaction_conflicts_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Record a promotion attempt
    pub fn record_promotion(&self, result: PromotionResult) {
        self.promotion_metrics
            .promotions_total
            .with_label_values(&[result.as_str()])
            .inc();
    }

    pub fn record_auto_promotion_failure(&self) {
        self.promotion_metrics.auto_promotion_failures_total.inc();
    }

    pub fn record_sweep(&self) {
        self.promotion_metrics.sweeps_total.inc();
    }

    /// Record an event publish attempt
    pub fn record_event_published(&self, event_type: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .events_published_total
            .with_label_values(&[event_type, status])
            .inc();
    }

    /// Record an operation duration
    pub fn record_operation(&self, operation: &str, duration: Duration) {
        self.performance_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Totals across all label values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rsvp_requests: counter_total(&self.rsvp_metrics.requests_total),
            rsvp_failures: counter_total(&self.rsvp_metrics.failures_total),
            transaction_conflicts: counter_total(&self.rsvp_metrics.transaction_conflicts_total),
            promotions: self
                .promotion_metrics
                .promotions_total
                .with_label_values(&[PromotionResult::Promoted.as_str()])
                .get(),
            auto_promotion_failures: self.promotion_metrics.auto_promotion_failures_total.get(),
            events_failed: ["participant_state_changed", "waitlist_promoted"]
                .into_iter()
                .map(|event_type| {
                    self.service_metrics
                        .events_published_total
                        .with_label_values(&[event_type, "error"])
                        .get()
                })
                .sum(),
            sweeps: self.promotion_metrics.sweeps_total.get(),
            uptime_seconds: self.service_metrics.uptime_seconds.get(),
        }
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

fn counter_total(counter: &IntCounterVec) -> u64 {
    use prometheus::core::Collector;

    counter
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("attendance_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "attendance_events_published_total",
                "Attendance events handed to the publisher",
            ),
            &["event_type", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        let health_status = IntGauge::new(
            "attendance_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("attendance_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            events_published_total,
            health_status,
            component_health,
        })
    }
}

impl RsvpMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("attendance_rsvp_requests_total", "Completed RSVP requests"),
            &["desired_state", "resulting_state"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new("attendance_rsvp_failures_total", "Failed RSVP requests"),
            &["desired_state", "error"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let transaction_conflicts_total = IntCounterVec::new(
            Opts::new(
                "attendance_transaction_conflicts_total",
                "Transaction attempts rejected by optimistic validation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(transaction_conflicts_total.clone()))?;

        Ok(Self {
            requests_total,
            failures_total,
            transaction_conflicts_total,
        })
    }
}

impl PromotionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let promotions_total = IntCounterVec::new(
            Opts::new(
                "attendance_promotions_total",
                "Waitlist promotion attempts by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(promotions_total.clone()))?;

        let auto_promotion_failures_total = IntCounter::new(
            "attendance_auto_promotion_failures_total",
            "Auto-promotions that failed after a slot was freed",
        )?;
        registry.register(Box::new(auto_promotion_failures_total.clone()))?;

        let sweeps_total = IntCounter::new("attendance_sweeps_total", "Waitlist sweeper passes")?;
        registry.register(Box::new(sweeps_total.clone()))?;

        Ok(Self {
            promotions_total,
            auto_promotion_failures_total,
            sweeps_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let rsvp_duration = Histogram::with_opts(
            HistogramOpts::new(
                "attendance_rsvp_duration_seconds",
                "RSVP processing time including retries",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(rsvp_duration.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "attendance_operation_duration_seconds",
                "Operation duration",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            rsvp_duration,
            operation_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
