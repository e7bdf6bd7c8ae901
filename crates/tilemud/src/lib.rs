//! # TileMUD server
//!
//! Authoritative realtime session backend: HTTP bootstrap, WebSocket
//! rooms, ordered intent processing, durable action events, and
//! degraded-mode signaling.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tilemud::TileMudServer;
//! use tilemud_session::DevTokenValidator;
//! use tilemud_store::{MemoryDurableStore, MemoryKvStore};
//!
//! # async fn run() -> Result<(), tilemud::ServerError> {
//! let server = TileMudServer::builder()
//!     .http_bind("0.0.0.0:8080")
//!     .realtime_bind("0.0.0.0:8081")
//!     .build(
//!         Arc::new(MemoryKvStore::new()),
//!         Arc::new(MemoryDurableStore::new()),
//!         DevTokenValidator,
//!     )
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod http;
mod server;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{ServerState, TileMudServer, TileMudServerBuilder};
