//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the document store,
//! the attendance manager, event publishing, the HTTP server and the background
//! tasks together.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::publisher::{
    AmqpEventPublisher, EventPublisher, NoopEventPublisher, PublisherConfig,
};
use crate::attendance::AttendanceManager;
use crate::config::AppConfig;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::store::{DocumentStore, InMemoryDocumentStore};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Backing document store
    store: Arc<dyn DocumentStore>,

    /// Attendance protocol entry point
    manager: Arc<AttendanceManager>,

    /// AMQP connection, absent when publishing is disabled
    amqp_connection: Option<Arc<AmqpConnection>>,

    /// Shared metrics collector
    metrics_collector: Arc<MetricsCollector>,

    /// HTTP server, present while started
    http_server: Mutex<Option<Arc<HealthServer>>>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} attendance service", config.service.name);

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let (amqp_connection, event_publisher) = Self::initialize_publishing(&config).await?;
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());

        let manager = Arc::new(AttendanceManager::with_settings(
            store.clone(),
            event_publisher,
            config.admission.clone(),
            metrics_collector.clone(),
        ));

        Ok(Self {
            config,
            store,
            manager,
            amqp_connection,
            metrics_collector,
            http_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Connect to the broker and build the event publisher
    async fn initialize_publishing(
        config: &AppConfig,
    ) -> Result<(Option<Arc<AmqpConnection>>, Arc<dyn EventPublisher>), ServiceError> {
        if !config.amqp.enabled {
            info!("AMQP publishing disabled - attendance events will be dropped");
            return Ok((None, Arc::new(NoopEventPublisher)));
        }

        info!("Connecting to AMQP broker: {}", config.amqp.url);
        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: e.to_string(),
            })?;

        let connection =
            AmqpConnection::new(&amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: e.to_string(),
            })?;

        let publisher_config = PublisherConfig {
            exchange_name: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..Default::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Ok((Some(Arc::new(connection)), Arc::new(publisher)))
    }

    /// Start the HTTP server and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting {} attendance service", self.config.service.name);

        *self.is_running.write().await = true;

        self.start_http_server().await?;
        self.start_background_tasks().await;

        info!("✅ Attendance service started successfully");
        Ok(())
    }

    async fn start_http_server(self: &Arc<Self>) -> Result<(), ServiceError> {
        let server_config = HealthServerConfig {
            port: self.config.service.http_port,
            host: "0.0.0.0".to_string(),
        };
        let server = Arc::new(
            HealthServer::new(server_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );

        let task_server = server.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = task_server.start().await {
                error!("HTTP server failed: {}", e);
            } else {
                info!("HTTP server task completed");
            }
        });

        *self.http_server.lock().await = Some(server);
        self.background_tasks.lock().await.push(handle);

        info!(
            "✅ HTTP server started on port {}",
            self.config.service.http_port
        );
        Ok(())
    }

    async fn start_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.background_tasks.lock().await;

        if self.config.admission.enable_sweeper {
            tasks.push(self.manager.clone().start_sweeper_task());
        } else {
            info!("Waitlist sweeper disabled - relying on inline auto-promotion only");
        }

        info!("Starting health metrics task (60s interval)...");
        let state = self.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));

            while *state.is_running.read().await {
                interval.tick().await;

                state.metrics_collector.update_uptime(state.uptime());

                let store_ok = state.store.ping().await.is_ok();
                let amqp_ok = state.amqp_connection.as_ref().map_or(true, |c| c.is_open());
                state
                    .metrics_collector
                    .update_component_health("store", store_ok);
                state
                    .metrics_collector
                    .update_component_health("amqp", amqp_ok);
                state.metrics_collector.update_health_status(match (store_ok, amqp_ok) {
                    (true, true) => 2,
                    (true, false) => 1,
                    _ => 0,
                });

                debug!(
                    "Updated service health metrics - uptime: {}s",
                    state.uptime().as_secs()
                );
            }
        }));

        info!("{} background tasks running", tasks.len());
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of attendance service");

        *self.is_running.write().await = false;

        if let Some(server) = self.http_server.lock().await.take() {
            if let Err(e) = server.stop().await {
                warn!("Failed to stop HTTP server: {}", e);
            }
        }

        // Deliver events already committed before the broker goes away
        self.manager.flush_events().await;

        if let Some(connection) = &self.amqp_connection {
            if connection.is_open() {
                if let Err(e) = connection.close().await {
                    warn!("Failed to close AMQP connection: {}", e);
                }
            }
        }

        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let task_count = tasks.len();
        for task in tasks {
            task.abort();
        }
        info!("Stopped {} background tasks", task_count);

        info!(
            "Final statistics: {:?}",
            self.metrics_collector.snapshot()
        );
        info!("✅ Attendance service shutdown completed");
        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn manager(&self) -> Arc<AttendanceManager> {
        self.manager.clone()
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    /// AMQP connection for health checks
    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
