mod apprunner;
mod clients;
mod cloudfront;
mod cloudwatch;
mod config;
mod discovery;
mod ec2;
mod elasticache;
mod lambda;
mod orchestrator;
mod rds;
mod s3;
mod schedule;
mod server;
mod status;
mod tags;
mod vault;

use anyhow::Result;
use tracing::info;

use clients::AwsClients;
use config::Config;

/// Application entry point.
///
/// Loads configuration from environment variables, builds one shared AWS
/// client set, and serves the resource-manager HTTP API.
#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
        .init();

    let config = Config::from_env()?;

    info!(
        environment = %config.environment,
        region = %config.region,
        project = %config.project,
        port = config.port,
        "Resource manager initialized"
    );

    let clients = AwsClients::new(&config.region).await;

    server::serve(config, clients).await
}
