//! Metrics and monitoring for the attendance service
//!
//! This module provides Prometheus metrics collection and the HTTP server that
//! exposes health, metrics and the attendance API.

pub mod collector;
pub mod health;

pub use collector::{
    MetricsCollector, MetricsSnapshot, PerformanceMetrics, PromotionMetrics, RsvpMetrics,
    ServiceMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
