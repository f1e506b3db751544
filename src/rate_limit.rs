//! Sliding-window rate limiting backed by Redis
//!
//! Each limited key maps to a Redis sorted set of request timestamps. A Lua
//! script prunes entries older than the window, counts what remains, and
//! conditionally inserts the new request, so check-and-record is atomic even
//! with many processes sharing the same Redis.
//!
//! Decisions carry everything a caller needs for response headers: whether
//! the request is allowed, how many requests remain, and when the window
//! resets.

use crate::error::Result;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Prune expired entries, count the rest, and insert if under the limit.
///
/// KEYS[1] = sorted-set key
/// ARGV[1] = window start (ms), ARGV[2] = now (ms), ARGV[3] = max requests,
/// ARGV[4] = member id, ARGV[5] = window length (ms, for key expiry)
///
/// Returns {allowed, count_after, oldest_ts_ms}.
const SLIDING_WINDOW_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
if count < tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], ARGV[2], ARGV[4])
    redis.call('PEXPIRE', KEYS[1], ARGV[5])
    return {1, count + 1, 0}
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
return {0, count, tonumber(oldest[2])}
"#;

/// Limit shape: at most `max_requests` per sliding `window`
#[derive(Debug, Clone, Copy)]
pub struct RateLimitProfile {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitProfile {
    /// Strict profile for authentication endpoints: 5 per 15 minutes
    pub fn auth() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_secs(15 * 60),
        }
    }

    /// Default API profile: 100 per minute
    pub fn general_api() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window (0 when denied)
    pub remaining: u32,
    /// When the window next frees a slot
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Build a decision from the raw script reply
    ///
    /// Pure so the window arithmetic is testable without Redis. `oldest_ms`
    /// is the timestamp of the oldest surviving entry, only meaningful on
    /// denial; an allowed request resets a full window from now.
    pub fn from_raw(
        allowed: bool,
        count: i64,
        oldest_ms: i64,
        now_ms: i64,
        profile: RateLimitProfile,
    ) -> Self {
        let window_ms = profile.window.as_millis() as i64;
        let remaining = profile.max_requests.saturating_sub(count.max(0) as u32);
        let reset_ms = if allowed {
            now_ms + window_ms
        } else {
            oldest_ms + window_ms
        };
        Self {
            allowed,
            remaining,
            reset_at: DateTime::<Utc>::from_timestamp_millis(reset_ms).unwrap_or_else(Utc::now),
        }
    }
}

/// Shared sliding-window limiter
///
/// Cheap to clone; all clones share the multiplexed Redis connection.
#[derive(Clone)]
pub struct RateLimiter {
    conn: ConnectionManager,
    script: Script,
}

impl RateLimiter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }

    /// Check-and-record one request for `key` under `profile`
    ///
    /// `key` identifies the limited principal (client IP, account id,
    /// endpoint class); it is namespaced before hitting Redis.
    pub async fn check(&self, key: &str, profile: RateLimitProfile) -> Result<RateLimitDecision> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let window_ms = profile.window.as_millis() as i64;
        let redis_key = format!("ratelimit:{key}");
        // Unique member so two requests in the same millisecond both count
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4().simple());

        let mut conn = self.conn.clone();
        let (allowed, count, oldest_ms): (i64, i64, i64) = self
            .script
            .key(&redis_key)
            .arg(now_ms - window_ms)
            .arg(now_ms)
            .arg(profile.max_requests)
            .arg(&member)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        let decision = RateLimitDecision::from_raw(allowed == 1, count, oldest_ms, now_ms, profile);
        if !decision.allowed {
            debug!(key, reset_at = %decision.reset_at, "rate limit exceeded");
        }
        Ok(decision)
    }
}
