//! Server binary: memory-backed stores and the development token
//! validator. Production deployments swap the store backends behind the
//! same traits.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilemud::{ServerConfig, TileMudServer};
use tilemud_session::DevTokenValidator;
use tilemud_store::{MemoryDurableStore, MemoryKvStore};

#[tokio::main]
async fn main() -> Result<(), tilemud::ServerError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tilemud=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("TILEMUD_HTTP_ADDR") {
        config.http_addr = addr;
    }
    if let Ok(addr) = std::env::var("TILEMUD_REALTIME_ADDR") {
        config.realtime_addr = addr;
    }

    let server = TileMudServer::<
        MemoryKvStore,
        MemoryDurableStore,
        DevTokenValidator,
    >::builder()
    .config(config)
    .build(
        Arc::new(MemoryKvStore::new()),
        Arc::new(MemoryDurableStore::new()),
        DevTokenValidator,
    )
    .await?;

    server.run().await
}
