//! AMQP integration for the attendance service
//!
//! This module handles the broker connection and outbound event publishing.

pub mod connection;
pub mod dispatcher;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use dispatcher::EventDispatcher;
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, NoopEventPublisher, PublisherConfig};
