/// clinicflow server entry point
///
/// Reads configuration from the environment and serves:
/// - Flow management API at /api/flows/*
/// - Execution start at POST /api/flows/execute, status at /api/executions/{id}
/// - Health check at /healthz

use clinicflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
