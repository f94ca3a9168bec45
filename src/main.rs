//! Relay: an internal-network API testing tool.
//!
//! Entry point. Loads configuration from the environment and starts the
//! HTTP server with the full request-orchestration API mounted at `/api/*`.

use relay::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
