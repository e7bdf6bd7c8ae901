//! Room configuration.

use std::time::Duration;

use tilemud_protocol::InstanceId;

/// Configuration for one room instance.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// The instance this room hosts.
    pub instance_id: InstanceId,

    /// Maximum concurrently connected clients.
    pub max_clients: usize,

    /// Grace window granted on unexpected disconnect.
    pub grace_period_ms: u64,

    /// Pause between emitting `event.version_mismatch` and closing the
    /// socket, so the event reaches the client before the close frame.
    pub version_mismatch_flush_delay: Duration,

    /// Whether the room tears itself down when the last client leaves.
    pub auto_dispose: bool,

    /// Command channel capacity (backpressure bound).
    pub channel_size: usize,
}

impl RoomConfig {
    pub fn for_instance(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            ..Self::default()
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            instance_id: InstanceId::new("default"),
            max_clients: 120,
            grace_period_ms: 60_000,
            version_mismatch_flush_delay: Duration::from_millis(50),
            auto_dispose: false,
            channel_size: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RoomConfig::default();
        assert_eq!(config.max_clients, 120);
        assert_eq!(config.grace_period_ms, 60_000);
        assert_eq!(
            config.version_mismatch_flush_delay,
            Duration::from_millis(50)
        );
        assert!(!config.auto_dispose);
    }

    #[test]
    fn test_for_instance_overrides_id_only() {
        let config =
            RoomConfig::for_instance(InstanceId::new("arena-1"));
        assert_eq!(config.instance_id, InstanceId::new("arena-1"));
        assert_eq!(config.max_clients, 120);
    }
}
