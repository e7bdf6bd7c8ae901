//! Sliding-window rate limiting over KV sorted sets.
//!
//! Each channel is configured with one or more `(duration, limit)`
//! windows; an admission must satisfy every window. Entries are
//! timestamped members in a sorted set per `(channel, subject, window)`
//! key; eviction happens on the read path, and the set's TTL equals the
//! window so idle subjects cost nothing.
//!
//! Failure policy: enforce fails closed. A KV error denies the request
//! with a retryable internal error, identically for every channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use tilemud_protocol::catalog::{self, CatalogError};

use crate::clock::now_ms;
use crate::kv::KvStore;

/// Channel name for in-instance chat.
pub const CHANNEL_CHAT_IN_INSTANCE: &str = "chat_in_instance";
/// Channel name for private messages.
pub const CHANNEL_PRIVATE_MESSAGE: &str = "private_message";
/// Channel name for tile placement actions.
pub const CHANNEL_TILE_ACTION: &str = "tile_action";

/// One sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub duration_ms: u64,
    pub limit: u32,
}

/// Limiter configuration: a key prefix plus per-channel window lists.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub prefix: String,
    pub channels: HashMap<String, Vec<RateLimitWindow>>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut channels = HashMap::new();
        channels.insert(
            CHANNEL_CHAT_IN_INSTANCE.to_string(),
            vec![RateLimitWindow {
                duration_ms: 10_000,
                limit: 20,
            }],
        );
        channels.insert(
            CHANNEL_PRIVATE_MESSAGE.to_string(),
            vec![RateLimitWindow {
                duration_ms: 10_000,
                limit: 10,
            }],
        );
        channels.insert(
            CHANNEL_TILE_ACTION.to_string(),
            vec![
                RateLimitWindow {
                    duration_ms: 1_000,
                    limit: 5,
                },
                RateLimitWindow {
                    duration_ms: 2_000,
                    limit: 10,
                },
            ],
        );
        Self {
            prefix: "ratelimit".to_string(),
            channels,
        }
    }
}

/// Outcome of a rate-limit evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub channel: String,
    pub allowed: bool,
    /// Admissions left in the most constrained window (allow only).
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    pub window_ms: Option<u64>,
    /// Seconds to wait before retrying (deny only), ≥ 1.
    pub retry_after_seconds: Option<u64>,
}

/// Multi-window sliding-counter rate limiter.
pub struct RateLimiter<K: KvStore> {
    kv: Arc<K>,
    config: RateLimitConfig,
}

impl<K: KvStore> RateLimiter<K> {
    pub fn new(kv: Arc<K>, config: RateLimitConfig) -> Self {
        Self { kv, config }
    }

    /// Evaluates (and on allow, records) an admission for
    /// `(channel, subject)` at the current time.
    pub async fn evaluate(
        &self,
        channel: &str,
        subject: &str,
    ) -> Result<RateLimitDecision, CatalogError> {
        self.evaluate_at(channel, subject, now_ms()).await
    }

    /// Clock-injected variant of [`evaluate`](Self::evaluate).
    pub async fn evaluate_at(
        &self,
        channel: &str,
        subject: &str,
        now: u64,
    ) -> Result<RateLimitDecision, CatalogError> {
        let Some(windows) = self.config.channels.get(channel) else {
            // Unconfigured channels are unlimited.
            return Ok(RateLimitDecision {
                channel: channel.to_string(),
                allowed: true,
                remaining: None,
                limit: None,
                window_ms: None,
                retry_after_seconds: None,
            });
        };

        let kv_err = |e: crate::StoreError| {
            CatalogError::internal(format!("rate limiter kv failure: {e}"))
        };

        // Pass 1: evict and count every window; collect violations.
        let mut counts = Vec::with_capacity(windows.len());
        let mut retry_after: Option<u64> = None;
        let mut violated: Option<RateLimitWindow> = None;
        for window in windows {
            let key = self.window_key(channel, subject, window);
            let floor = now.saturating_sub(window.duration_ms);
            self.kv
                .sorted_remove_below(&key, floor)
                .await
                .map_err(kv_err)?;
            let count = self.kv.sorted_count(&key).await.map_err(kv_err)?;
            if count >= u64::from(window.limit) {
                let oldest = self
                    .kv
                    .sorted_min_score(&key)
                    .await
                    .map_err(kv_err)?
                    .unwrap_or(now);
                let wait_ms =
                    (oldest + window.duration_ms).saturating_sub(now);
                let wait_secs = wait_ms.div_ceil(1000).max(1);
                retry_after =
                    Some(retry_after.map_or(wait_secs, |r| r.max(wait_secs)));
                violated.get_or_insert(*window);
            }
            counts.push((*window, count));
        }

        if let Some(window) = violated {
            tracing::debug!(
                channel,
                subject,
                limit = window.limit,
                window_ms = window.duration_ms,
                "rate limit exceeded"
            );
            return Ok(RateLimitDecision {
                channel: channel.to_string(),
                allowed: false,
                remaining: None,
                limit: Some(window.limit),
                window_ms: Some(window.duration_ms),
                retry_after_seconds: retry_after,
            });
        }

        // Pass 2: admit into every window under one member id.
        let member = format!("{now}-{:08x}", rand::rng().random::<u32>());
        for window in windows {
            let key = self.window_key(channel, subject, window);
            self.kv
                .sorted_add(
                    &key,
                    member.clone(),
                    now,
                    Duration::from_millis(window.duration_ms),
                )
                .await
                .map_err(kv_err)?;
        }

        // Report the window with the least headroom after admission.
        let tightest = counts
            .iter()
            .min_by_key(|(w, count)| u64::from(w.limit) - (count + 1))
            .expect("windows is non-empty");
        Ok(RateLimitDecision {
            channel: channel.to_string(),
            allowed: true,
            remaining: Some(
                (u64::from(tightest.0.limit) - (tightest.1 + 1)) as u32,
            ),
            limit: Some(tightest.0.limit),
            window_ms: Some(tightest.0.duration_ms),
            retry_after_seconds: None,
        })
    }

    /// Like [`evaluate`](Self::evaluate) but a denial is an error.
    pub async fn enforce(
        &self,
        channel: &str,
        subject: &str,
    ) -> Result<RateLimitDecision, CatalogError> {
        self.enforce_at(channel, subject, now_ms()).await
    }

    pub async fn enforce_at(
        &self,
        channel: &str,
        subject: &str,
        now: u64,
    ) -> Result<RateLimitDecision, CatalogError> {
        let decision = self.evaluate_at(channel, subject, now).await?;
        if decision.allowed {
            return Ok(decision);
        }
        let mut err =
            CatalogError::from_reason(catalog::RATE_LIMIT_EXCEEDED)
                .with_detail(format!("channel {channel}"));
        if let Some(secs) = decision.retry_after_seconds {
            err = err.with_retry_after(secs);
        }
        Err(err)
    }

    fn window_key(
        &self,
        channel: &str,
        subject: &str,
        window: &RateLimitWindow,
    ) -> String {
        format!(
            "{}:{channel}:{subject}:{}",
            self.config.prefix, window.duration_ms
        )
    }
}
