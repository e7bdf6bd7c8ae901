//! `TileMudServer` builder and server loop.
//!
//! Wires every layer together (stores, guard, health, rate limiting,
//! sessions, the room actor) and runs the two surfaces: the HTTP
//! bootstrap/version API and the realtime WebSocket accept loop.

use std::sync::Arc;

use tilemud_protocol::{JsonCodec, VersionService};
use tilemud_room::{
    ActionPipeline, ReconnectSessionManager, RoomHandle, RoomServices,
    spawn_room,
};
use tilemud_session::{
    ActionSequenceService, ProfileService, ReconnectFlowService,
    ReconnectTokenStore, SessionBootstrapService, SessionStore,
    TokenValidator,
};
use tilemud_store::{
    ActionDurabilityService, DbOutageGuard, DegradedSignalService,
    DurableStore, KvStore, RateLimiter, clock::now_ms,
};
use tilemud_transport::{Transport, WebSocketTransport};

use tilemud_protocol::Dependency;

use crate::handler::handle_connection;
use crate::http;
use crate::{ServerConfig, ServerError};

/// Shared server state handed to every connection handler and HTTP
/// request.
pub struct ServerState<K, D, A>
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    pub config: ServerConfig,
    pub started_at: u64,
    pub codec: JsonCodec,
    pub sessions: Arc<SessionStore>,
    pub version: Arc<VersionService>,
    pub health: Arc<DegradedSignalService>,
    pub guard: Arc<DbOutageGuard>,
    pub rate_limiter: Arc<RateLimiter<K>>,
    pub pipeline: Arc<ActionPipeline<K>>,
    pub bootstrap: SessionBootstrapService<K, D, A>,
    pub reconnect: ReconnectFlowService<K, D>,
    pub room: RoomHandle,
}

/// Builder for configuring and starting a TileMUD server.
///
/// ```rust,ignore
/// let server = TileMudServer::builder()
///     .config(config)
///     .build(kv, durable, DevTokenValidator)
///     .await?;
/// server.run().await
/// ```
pub struct TileMudServerBuilder {
    config: ServerConfig,
}

impl TileMudServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn http_bind(mut self, addr: &str) -> Self {
        self.config.http_addr = addr.to_string();
        self
    }

    pub fn realtime_bind(mut self, addr: &str) -> Self {
        self.config.realtime_addr = addr.to_string();
        self
    }

    /// Builds the full service graph over the supplied store backends
    /// and token validator, binds both listeners, and spawns the room.
    pub async fn build<K, D, A>(
        self,
        kv: Arc<K>,
        durable: Arc<D>,
        validator: A,
    ) -> Result<TileMudServer<K, D, A>, ServerError>
    where
        K: KvStore,
        D: DurableStore,
        A: TokenValidator,
    {
        let config = self.config;

        let supported: Vec<&str> = config
            .supported_versions
            .iter()
            .map(String::as_str)
            .collect();
        let version = Arc::new(VersionService::new(
            &config.protocol_version,
            &supported,
            config.protocol_name.clone(),
        )?);

        let health =
            Arc::new(DegradedSignalService::new(config.health.clone()));
        let guard = Arc::new(DbOutageGuard::new(
            config.guard.clone(),
            Dependency::Postgres,
            Arc::clone(&health),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::clone(&kv),
            config.rate_limit.clone(),
        ));
        let pipeline = Arc::new(ActionPipeline::new(
            Arc::clone(&rate_limiter),
            config.pipeline_max_queue_size,
        ));

        let sessions = Arc::new(SessionStore::new());
        let tokens = Arc::new(ReconnectTokenStore::new(
            Arc::clone(&kv),
            config.reconnect_token_ttl_seconds,
        ));
        let sequence = Arc::new(ActionSequenceService::new(
            Arc::clone(&sessions),
            config.pending_snapshot_ttl_ms,
        ));
        let durability = Arc::new(ActionDurabilityService::new(
            Arc::clone(&durable),
            Arc::clone(&guard),
        ));
        let profiles = Arc::new(ProfileService::new(
            Arc::clone(&durable),
            Arc::clone(&guard),
        ));
        let grace = Arc::new(ReconnectSessionManager::new(
            Arc::clone(&kv),
            config.room.grace_period_ms,
        ));

        let bootstrap = SessionBootstrapService::new(
            validator,
            Arc::clone(&sessions),
            Arc::clone(&tokens),
            Arc::clone(&profiles),
            config.protocol_version.clone(),
            config.room.instance_id.as_str().to_string(),
        );
        let reconnect = ReconnectFlowService::new(
            Arc::clone(&sessions),
            Arc::clone(&tokens),
            Arc::clone(&durability),
            Arc::clone(&profiles),
            config.delta_window,
        );

        let room = spawn_room(
            config.room.clone(),
            RoomServices {
                sessions: Arc::clone(&sessions),
                sequence: Arc::clone(&sequence),
                durability: Arc::clone(&durability),
                profiles: Arc::clone(&profiles),
                health: Arc::clone(&health),
                version: Arc::clone(&version),
                grace: Arc::clone(&grace),
            },
        );

        let transport =
            WebSocketTransport::bind(&config.realtime_addr).await?;
        let http_listener =
            tokio::net::TcpListener::bind(&config.http_addr).await?;

        let state = Arc::new(ServerState {
            started_at: now_ms(),
            codec: JsonCodec,
            sessions,
            version,
            health,
            guard,
            rate_limiter,
            pipeline,
            bootstrap,
            reconnect,
            room,
            config,
        });

        Ok(TileMudServer {
            transport,
            http_listener,
            state,
        })
    }
}

impl Default for TileMudServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A built TileMUD server, ready to run.
pub struct TileMudServer<K, D, A>
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    transport: WebSocketTransport,
    http_listener: tokio::net::TcpListener,
    state: Arc<ServerState<K, D, A>>,
}

impl<K, D, A> TileMudServer<K, D, A>
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    pub fn builder() -> TileMudServerBuilder {
        TileMudServerBuilder::new()
    }

    /// The bound HTTP address.
    pub fn http_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.http_listener.local_addr()
    }

    /// The bound realtime WebSocket address.
    pub fn realtime_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs both surfaces until the process is terminated.
    pub async fn run(mut self) -> Result<(), ServerError> {
        tracing::info!(
            http = %self.http_addr()?,
            realtime = %self.realtime_addr()?,
            version = %self.state.config.protocol_version,
            "TileMUD server running"
        );

        let app = http::router(Arc::clone(&self.state));
        let http_listener = self.http_listener;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(http_listener, app).await {
                tracing::error!(error = %e, "http surface stopped");
            }
        });

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(conn, state).await
                        {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
