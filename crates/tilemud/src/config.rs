//! Server configuration: the recognized tuning knobs of the realtime
//! core, with the documented defaults.

use tilemud_room::RoomConfig;
use tilemud_store::{GuardConfig, HealthConfig, RateLimitConfig};

/// Full server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the HTTP surface (bootstrap, version).
    pub http_addr: String,
    /// Bind address for the realtime WebSocket surface.
    pub realtime_addr: String,

    /// Current protocol version, served and enforced on join.
    pub protocol_version: String,
    /// Additionally supported client versions.
    pub supported_versions: Vec<String>,
    /// Protocol name tag reported by `GET /api/version`.
    pub protocol_name: String,

    /// Degraded-signal hysteresis thresholds.
    pub health: HealthConfig,
    /// DB outage guard thresholds.
    pub guard: GuardConfig,
    /// Per-channel rate-limit windows.
    pub rate_limit: RateLimitConfig,

    /// Action pipeline capacity.
    pub pipeline_max_queue_size: usize,
    /// Pending-snapshot lifetime in the sequence service.
    pub pending_snapshot_ttl_ms: u64,
    /// Reconnect token lifetime.
    pub reconnect_token_ttl_seconds: u64,
    /// Maximum sequence gap bridged by delta replay on resume.
    pub delta_window: i64,

    /// The room hosted by this server (instance id, capacity, grace
    /// window).
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8080".into(),
            realtime_addr: "127.0.0.1:8081".into(),
            protocol_version: "1.0.0".into(),
            supported_versions: Vec::new(),
            protocol_name: "tilemud.realtime".into(),
            health: HealthConfig::default(),
            guard: GuardConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pipeline_max_queue_size: 512,
            pending_snapshot_ttl_ms: 10_000,
            reconnect_token_ttl_seconds: 300,
            delta_window: 50,
            room: RoomConfig::default(),
        }
    }
}
