//! # Queue Listener Service
//!
//! Runs every listener described in the service configuration until the
//! process is asked to shut down, then stops them all within the configured
//! shutdown timeout.
//!
//! Configuration is read from, in order (later sources override earlier ones):
//! 1. `/etc/queue-listener/service.yaml`
//! 2. `./config/service.yaml`
//! 3. An explicit YAML file (`--config` or `QL_CONFIG_FILE`)
//! 4. Environment variables prefixed `QL__` with a double-underscore
//!    separator, e.g. `QL__SHUTDOWN_TIMEOUT_SECONDS=10`
//!
//! ```yaml
//! shutdown_timeout_seconds: 30
//! logging:
//!   level: info
//!   json_format: true
//! aws:
//!   region: eu-west-1
//! clients:
//!   reporting:
//!     region: us-east-1
//! listeners:
//!   - identifier: orders
//!     queue_url: https://sqs.eu-west-1.amazonaws.com/123456789012/orders
//!     concurrency_level: 4
//!   - identifier: reports
//!     queue: reports
//!     client: reporting
//! ```
//!
//! A listener without `client` uses the default client built from `aws`.
//! A `queue` given by name is looked up through the listener's client.

use async_trait::async_trait;
use queue_listener_core::{
    ConfigurationError, HandlerError, ListenerBuilder, ListenerConfig, ListenerError, Message,
    MessageHandler, QueueClient, SimpleMessageListenerContainer,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "QL_CONFIG_FILE";

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "QL";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ============================================================================
// Configuration
// ============================================================================

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listeners to run; at least one is required
    pub listeners: Vec<ListenerConfig>,

    /// Time allowed for all listeners to stop after a shutdown signal
    pub shutdown_timeout_seconds: u64,

    pub logging: LoggingConfig,

    /// Settings of the default client
    pub aws: AwsConfig,

    /// Additional named clients that listeners can select with `client`
    pub clients: BTreeMap<String, AwsConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            shutdown_timeout_seconds: 30,
            logging: LoggingConfig::default(),
            aws: AwsConfig::default(),
            clients: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Validate the service settings and every listener
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.listeners.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "listeners".to_string(),
            });
        }

        if self.shutdown_timeout_seconds == 0 {
            return Err(ConfigurationError::OutOfRange {
                field: "shutdown_timeout_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        self.logging.validate()?;

        let mut identifiers = HashSet::new();
        for listener in &self.listeners {
            if !identifiers.insert(listener.identifier.as_str()) {
                return Err(ConfigurationError::Invalid {
                    message: format!("duplicate listener identifier '{}'", listener.identifier),
                });
            }
            listener.validate()?;

            if let Some(client) = &listener.client {
                if !self.clients.contains_key(client) {
                    return Err(ConfigurationError::Invalid {
                        message: format!(
                            "listener '{}' refers to unknown client '{}'",
                            listener.identifier, client
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level, used when `RUST_LOG` is not set
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if LOG_LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            Err(ConfigurationError::OutOfRange {
                field: "logging.level".to_string(),
                message: format!("'{}' is not one of {}", self.level, LOG_LEVELS.join(", ")),
            })
        }
    }
}

/// AWS client settings; unset values come from the standard AWS environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: Option<String>,

    /// Endpoint override, e.g. a local SQS emulator
    pub endpoint_url: Option<String>,
}

/// Load and validate the service configuration.
///
/// `explicit_path` names a YAML file that must exist. A malformed file or an
/// environment variable that cannot be coerced to the right type is an
/// error, as is a configuration that fails validation.
pub fn load_config(explicit_path: Option<&str>) -> Result<ServiceConfig, ConfigurationError> {
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name("/etc/queue-listener/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name("config/service")
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Some(path) = explicit_path.filter(|p| !p.is_empty()) {
        builder = builder.add_source(
            config::File::from(std::path::Path::new(path))
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    let service_config: ServiceConfig = builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .and_then(|cfg| cfg.try_deserialize())
        .map_err(|e| ConfigurationError::Parsing {
            message: e.to_string(),
        })?;

    service_config.validate()?;

    Ok(service_config)
}

// ============================================================================
// Logging
// ============================================================================

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "queue_listener_service={level},queue_listener_core={level}",
            level = config.level.to_ascii_lowercase()
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

// ============================================================================
// Message Handling
// ============================================================================

/// Handler that logs each message and reports success
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        info!(
            message_id = %message.message_id,
            receive_count = message.receive_count,
            body_length = message.body.len(),
            "Received message"
        );
        Ok(())
    }
}

// ============================================================================
// Service Lifecycle
// ============================================================================

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Listener '{listener}' could not be started: {source}")]
    Startup {
        listener: String,
        #[source]
        source: ListenerError,
    },

    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),
}

/// The default queue client plus any named ones
#[derive(Clone)]
pub struct QueueClientProvider {
    default: Arc<dyn QueueClient>,
    named: HashMap<String, Arc<dyn QueueClient>>,
}

impl QueueClientProvider {
    pub fn new(default: Arc<dyn QueueClient>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    /// Register a client under `name`, replacing any earlier one
    pub fn with_client(mut self, name: impl Into<String>, client: Arc<dyn QueueClient>) -> Self {
        self.named.insert(name.into(), client);
        self
    }

    /// The client called `name`, or the default client for `None`
    pub fn client(&self, name: Option<&str>) -> Result<Arc<dyn QueueClient>, ConfigurationError> {
        match name {
            None => Ok(Arc::clone(&self.default)),
            Some(name) => self
                .named
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigurationError::Invalid {
                    message: format!("no queue client named '{}'", name),
                }),
        }
    }
}

/// Build one listener container per configured listener, all sharing the
/// given handler.
///
/// Every listener is validated before any container is built. Each listener
/// gets the client it names, and queue names are looked up through that
/// client.
pub async fn build_listeners(
    config: &ServiceConfig,
    clients: &QueueClientProvider,
    handler: Arc<dyn MessageHandler>,
) -> Result<Vec<SimpleMessageListenerContainer>, ServiceError> {
    config.validate()?;

    let mut listeners = Vec::with_capacity(config.listeners.len());
    for listener in &config.listeners {
        let client = clients.client(listener.client.as_deref())?;
        let builder = ListenerBuilder::resolve_from_config(listener, client, Arc::clone(&handler))
            .await
            .map_err(|source| ServiceError::Startup {
                listener: listener.identifier.clone(),
                source,
            })?;
        listeners.push(builder.build());
    }

    Ok(listeners)
}

/// Run all configured listeners until `shutdown` completes, then stop them.
///
/// Listeners are stopped concurrently, each with the configured shutdown
/// timeout. Every listener is stopped even when one fails; the first
/// failure is returned.
pub async fn run<F>(
    config: &ServiceConfig,
    clients: &QueueClientProvider,
    handler: Arc<dyn MessageHandler>,
    shutdown: F,
) -> Result<(), ServiceError>
where
    F: Future<Output = ()>,
{
    let listeners = build_listeners(config, clients, handler).await?;

    for listener in &listeners {
        listener.start().await;
        info!(listener = listener.identifier(), "Listener started");
    }
    info!(count = listeners.len(), "All listeners running");

    shutdown.await;

    let timeout = config.shutdown_timeout();
    info!(timeout_secs = timeout.as_secs(), "Stopping listeners");

    let results = futures::future::join_all(listeners.iter().map(|l| l.stop(timeout))).await;

    let mut first_error = None;
    for (listener, result) in listeners.iter().zip(results) {
        if let Err(e) = result {
            error!(listener = listener.identifier(), error = %e, "Listener did not stop cleanly");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => {
            info!("All listeners stopped");
            Ok(())
        }
    }
}

/// Completes on Ctrl+C or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
