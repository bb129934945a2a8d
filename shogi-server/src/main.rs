use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (SHOGI_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("SHOGI_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("shogi_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = shogi_server::config::ServerConfig::parse();
    tracing::info!("Starting shogi server on {}", config.listen_addr);
    if let Some(ref path) = config.ratings_file {
        tracing::info!("Rating table: {}", path.display());
    }
    let server = shogi_server::server::Server::new(config);
    server.run().await
}
