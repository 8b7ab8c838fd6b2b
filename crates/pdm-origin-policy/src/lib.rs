//! `C7` — per-origin allowed actions and token-bucket rate limiting.
//!
//! Origin Configs and Rate Buckets are exclusively owned here; no other
//! component reads or writes this map (spec §3 ownership summary).

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default allowed actions for a newly connected origin (spec §4.7).
pub const DEFAULT_ALLOWED_ACTIONS: &[&str] = &["ping", "get_identity", "store_data", "retrieve_data"];
pub const DEFAULT_MAX_REQUESTS: u32 = 50;
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmitRejection {
    #[error("origin has not connected")]
    Blocked,
    #[error("action not in the origin's allowed set")]
    NotAllowed,
    #[error("rate limit exceeded")]
    RateLimited,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self { max_requests: DEFAULT_MAX_REQUESTS, window_ms: DEFAULT_WINDOW_MS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    pub origin: String,
    pub allowed_actions: HashSet<String>,
    pub rate_limit: RateLimit,
    pub created_at: u64,
    pub last_used_at: u64,
}

impl OriginConfig {
    fn default_for(origin: &str, now: u64) -> Self {
        Self {
            origin: origin.to_string(),
            allowed_actions: DEFAULT_ALLOWED_ACTIONS.iter().map(|a| a.to_string()).collect(),
            rate_limit: RateLimit::default(),
            created_at: now,
            last_used_at: now,
        }
    }
}

struct RateBucket {
    timestamps_ms: Vec<u64>,
}

impl RateBucket {
    fn newest(&self) -> Option<u64> {
        self.timestamps_ms.last().copied()
    }

    /// Drops entries older than `window_ms` before the given instant.
    fn evict(&mut self, now_ms: u64, window_ms: u64) {
        let floor = now_ms.saturating_sub(window_ms);
        self.timestamps_ms.retain(|&t| t >= floor);
    }
}

struct OriginRecord {
    config: OriginConfig,
    bucket: RateBucket,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// `C7`. Owns the origin whitelist and rate buckets exclusively.
#[derive(Default)]
pub struct OriginPolicy {
    origins: Mutex<HashMap<String, OriginRecord>>,
}

impl OriginPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates the origin's record. A call with no prior record
    /// starts from the defaults and narrows to `requested_actions`
    /// intersected with what the broker permits to be requested at all —
    /// the source of truth for *which* actions exist is the router's
    /// action table, so this layer accepts whatever the caller asks for
    /// and leaves enforcement of unknown actions to `admit`.
    pub fn connect(&self, origin: &str, requested_actions: &[String], rate_limit: Option<RateLimit>) -> OriginConfig {
        let now = now_ms();
        let mut origins = self.origins.lock();
        let record = origins.entry(origin.to_string()).or_insert_with(|| OriginRecord {
            config: OriginConfig::default_for(origin, now),
            bucket: RateBucket { timestamps_ms: Vec::new() },
        });
        if !requested_actions.is_empty() {
            record.config.allowed_actions = requested_actions.iter().cloned().collect();
        }
        if let Some(limit) = rate_limit {
            record.config.rate_limit = limit;
        }
        record.config.last_used_at = now;
        record.config.clone()
    }

    pub fn disconnect(&self, origin: &str) {
        self.origins.lock().remove(origin);
    }

    pub fn get(&self, origin: &str) -> Option<OriginConfig> {
        self.origins.lock().get(origin).map(|r| r.config.clone())
    }

    /// Drops buckets whose newest timestamp is older than their own
    /// window, bounding memory without a background timer (spec §9
    /// design note 6). Run opportunistically whenever a new origin is
    /// about to be inserted.
    fn evict_stale_buckets(origins: &mut HashMap<String, OriginRecord>, now: u64) {
        origins.retain(|_, record| match record.bucket.newest() {
            Some(newest) => now.saturating_sub(newest) <= record.config.rate_limit.window_ms,
            None => true,
        });
    }

    /// Token-bucket admission: drops timestamps older than the window,
    /// rejects at the ceiling, otherwise appends `now` and admits.
    pub fn admit(&self, origin: &str, action: &str) -> Result<(), AdmitRejection> {
        let now = now_ms();
        let mut origins = self.origins.lock();

        if !origins.contains_key(origin) {
            Self::evict_stale_buckets(&mut origins, now);
        }

        let Some(record) = origins.get_mut(origin) else {
            return Err(AdmitRejection::Blocked);
        };
        if !record.config.allowed_actions.contains(action) {
            return Err(AdmitRejection::NotAllowed);
        }

        record.bucket.evict(now, record.config.rate_limit.window_ms);
        if record.bucket.timestamps_ms.len() as u32 >= record.config.rate_limit.max_requests {
            return Err(AdmitRejection::RateLimited);
        }
        record.bucket.timestamps_ms.push(now);
        record.config.last_used_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconnected_origin_is_blocked() {
        let policy = OriginPolicy::new();
        assert_eq!(policy.admit("https://a.example", "ping"), Err(AdmitRejection::Blocked));
    }

    #[test]
    fn connected_origin_admits_default_actions() {
        let policy = OriginPolicy::new();
        policy.connect("https://a.example", &[], None);
        assert!(policy.admit("https://a.example", "ping").is_ok());
    }

    #[test]
    fn action_outside_allowed_set_is_rejected() {
        let policy = OriginPolicy::new();
        policy.connect("https://a.example", &["ping".to_string()], None);
        assert_eq!(
            policy.admit("https://a.example", "store_data"),
            Err(AdmitRejection::NotAllowed)
        );
    }

    #[test]
    fn rate_limit_rejects_the_request_past_the_ceiling() {
        let policy = OriginPolicy::new();
        policy.connect(
            "https://a.example",
            &["ping".to_string()],
            Some(RateLimit { max_requests: 3, window_ms: 60_000 }),
        );
        for _ in 0..3 {
            assert!(policy.admit("https://a.example", "ping").is_ok());
        }
        assert_eq!(policy.admit("https://a.example", "ping"), Err(AdmitRejection::RateLimited));
    }

    #[test]
    fn rate_window_rollover_leaves_one_timestamp() {
        let policy = OriginPolicy::new();
        policy.connect(
            "https://a.example",
            &["ping".to_string()],
            Some(RateLimit { max_requests: 1, window_ms: 10 }),
        );
        assert!(policy.admit("https://a.example", "ping").is_ok());
        assert_eq!(policy.admit("https://a.example", "ping"), Err(AdmitRejection::RateLimited));
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(policy.admit("https://a.example", "ping").is_ok());
    }

    #[test]
    fn disconnect_removes_the_origin_entirely() {
        let policy = OriginPolicy::new();
        policy.connect("https://a.example", &[], None);
        policy.disconnect("https://a.example");
        assert_eq!(policy.admit("https://a.example", "ping"), Err(AdmitRejection::Blocked));
    }
}
