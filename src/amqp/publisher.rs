//! AMQP event publisher for outbound attendance events

use crate::amqp::messages::MessageEnvelope;
use crate::error::{AttendanceError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing attendance events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a ParticipantStateChanged event
    async fn publish_participant_state_changed(&self, event: ParticipantStateChanged)
        -> Result<()>;

    /// Publish a WaitlistPromoted event
    async fn publish_waitlist_promoted(&self, event: WaitlistPromoted) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange_name: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange_name: crate::amqp::messages::ATTENDANCE_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };

        publisher.setup_exchange().await?;

        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic");
        self.channel
            .exchange_declare(args)
            .await
            .map_err(|e| AttendanceError::EventPublish {
                message: format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange_name, e
                ),
            })?;

        info!("Declared AMQP exchange {}", self.config.exchange_name);
        Ok(())
    }

    /// Publish one message, retrying broker failures
    async fn publish_message(&self, message: AttendanceMessage) -> Result<()> {
        let envelope = MessageEnvelope::new(message);
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(&envelope).await {
                Ok(()) => {
                    debug!(
                        "Published message {} with routing key {}",
                        envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish(&self, envelope: &MessageEnvelope) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange_name, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| AttendanceError::EventPublish {
                message: format!("Failed to publish message: {}", e),
            })
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_participant_state_changed(
        &self,
        event: ParticipantStateChanged,
    ) -> Result<()> {
        self.publish_message(AttendanceMessage::ParticipantStateChanged(event))
            .await
    }

    async fn publish_waitlist_promoted(&self, event: WaitlistPromoted) -> Result<()> {
        self.publish_message(AttendanceMessage::WaitlistPromoted(event))
            .await
    }
}

/// Publisher used when event publishing is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish_participant_state_changed(
        &self,
        event: ParticipantStateChanged,
    ) -> Result<()> {
        debug!(
            "Dropping state change event for '{}' on match {}",
            event.user_id, event.match_id
        );
        Ok(())
    }

    async fn publish_waitlist_promoted(&self, event: WaitlistPromoted) -> Result<()> {
        debug!(
            "Dropping promotion event for '{}' on match {}",
            event.user_id, event.match_id
        );
        Ok(())
    }
}
