/// AI PlayGround: agent workflow execution engine
///
/// Starts the HTTP server with workflow management, diagram rendering and
/// execution endpoints.

use ai_playground::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (defaults to 0.0.0.0:3004 and data/playground.db)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
