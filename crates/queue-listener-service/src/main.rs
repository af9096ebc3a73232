//! # Queue Listener Service
//!
//! Binary entry point. Loads configuration, initializes logging, connects
//! to SQS and runs every configured listener until Ctrl+C or SIGTERM.
//!
//! Exit codes: 0 after a clean shutdown, 1 when a listener fails to stop
//! in time, 2 when a listener cannot be started (for example an unknown
//! queue name), 3 on configuration errors.

use anyhow::Context;
use clap::Parser;
use queue_listener_core::providers::SqsQueueClient;
use queue_listener_service::{
    init_logging, load_config, run, shutdown_signal, AwsConfig, LoggingConfig, LoggingHandler,
    QueueClientProvider, ServiceError,
};
use std::sync::Arc;
use tracing::{error, info};

const STARTUP_EXIT_CODE: i32 = 2;
const CONFIGURATION_EXIT_CODE: i32 = 3;

async fn sqs_client(config: &AwsConfig) -> Arc<SqsQueueClient> {
    Arc::new(SqsQueueClient::from_env(config.region.clone(), config.endpoint_url.clone()).await)
}

#[derive(Debug, Parser)]
#[command(name = "queue-listener", version, about = "Run queue listeners against AWS SQS")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "QL_CONFIG_FILE")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&LoggingConfig::default());
            error!(error = %e, "Service configuration is invalid; aborting");
            std::process::exit(CONFIGURATION_EXIT_CODE);
        }
    };

    init_logging(&config.logging);
    info!(
        listeners = config.listeners.len(),
        "Starting Queue Listener Service"
    );

    let mut clients = QueueClientProvider::new(sqs_client(&config.aws).await);
    for (name, aws) in &config.clients {
        clients = clients.with_client(name.clone(), sqs_client(aws).await);
    }

    match run(
        &config,
        &clients,
        Arc::new(LoggingHandler),
        shutdown_signal(),
    )
    .await
    {
        Ok(()) => {
            info!("Queue Listener Service stopped");
            Ok(())
        }
        Err(ServiceError::Configuration(e)) => {
            error!(error = %e, "Service configuration is invalid; aborting");
            std::process::exit(CONFIGURATION_EXIT_CODE);
        }
        Err(e @ ServiceError::Startup { .. }) => {
            error!(error = %e, "Listener could not be started; aborting");
            std::process::exit(STARTUP_EXIT_CODE);
        }
        Err(e) => Err(e).context("listeners did not shut down cleanly"),
    }
}
