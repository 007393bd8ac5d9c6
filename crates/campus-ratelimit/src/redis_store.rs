//! Redis window store
//!
//! Shared across every service instance. Check-and-increment is a single
//! Lua script round trip, so concurrent callers on different instances
//! cannot overshoot the limit. Keys carry a TTL equal to the window.

use crate::store::{Backend, StoreError, WindowStore};
use crate::window::{WindowHit, WindowPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::Script;

/// Conditional increment with expiry.
///
/// Returns `{admitted, count, ttl_ms}`. The counter is only incremented
/// when it is below the limit; the first increment sets the expiry.
const HIT_SCRIPT: &str = r#"
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
local admitted = 0
if count < limit then
  count = redis.call('INCR', KEYS[1])
  admitted = 1
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], window_ms)
  ttl = window_ms
end
return {admitted, count, ttl}
"#;

/// Default key namespace
pub const DEFAULT_KEY_PREFIX: &str = "campusgate:rl:";

/// Redis-backed window store
#[derive(Clone)]
pub struct RedisWindowStore {
    conn: ConnectionManager,
    script: Script,
    prefix: String,
}

impl RedisWindowStore {
    /// Connect to `url` (e.g. `redis://cache:6379/0`)
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::with_connection(conn, prefix))
    }

    /// Wrap an existing connection manager
    pub fn with_connection(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            script: Script::new(HIT_SCRIPT),
            prefix: prefix.into(),
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

/// Translate the script reply into a hit, anchored at `now`
pub(crate) fn hit_from_reply(
    reply: (i64, i64, i64),
    policy: &WindowPolicy,
    now: DateTime<Utc>,
) -> Result<WindowHit, StoreError> {
    let (admitted, count, ttl_ms) = reply;
    if count < 0 || ttl_ms < 0 || !(admitted == 0 || admitted == 1) {
        return Err(StoreError::Protocol(format!(
            "admitted={} count={} ttl={}",
            admitted, count, ttl_ms
        )));
    }

    let window = policy.window();
    let ttl = Duration::milliseconds(ttl_ms).min(window);
    let reset_at = now + ttl;

    Ok(WindowHit {
        admitted: admitted == 1,
        backend: Backend::Distributed,
        count: count as u64,
        limit: policy.limit,
        window_start: reset_at - window,
        reset_at,
    })
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn hit(
        &self,
        key: &str,
        policy: &WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<WindowHit, StoreError> {
        let mut conn = self.conn.clone();
        let reply: (i64, i64, i64) = self
            .script
            .key(self.redis_key(key))
            .arg(policy.limit)
            .arg(policy.window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        hit_from_reply(reply, policy, now)
    }

    fn kind(&self) -> Backend {
        Backend::Distributed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_admitted() {
        let now = Utc::now();
        let policy = WindowPolicy::new(100, 10_000);
        let hit = hit_from_reply((1, 1, 10_000), &policy, now).unwrap();

        assert!(hit.admitted);
        assert_eq!(hit.backend, Backend::Distributed);
        assert_eq!(hit.remaining(), 99);
        assert_eq!(hit.reset_at, now + Duration::seconds(10));
        assert_eq!(hit.window_start, now);
    }

    #[test]
    fn test_reply_blocked_mid_window() {
        let now = Utc::now();
        let policy = WindowPolicy::new(100, 10_000);
        let hit = hit_from_reply((0, 100, 4_000), &policy, now).unwrap();

        assert!(!hit.admitted);
        assert_eq!(hit.remaining(), 0);
        assert_eq!(hit.reset_at, now + Duration::seconds(4));
        assert_eq!(hit.window_start, now - Duration::seconds(6));
    }

    #[test]
    fn test_reply_garbage_rejected() {
        let policy = WindowPolicy::default();
        assert!(hit_from_reply((2, 1, 10), &policy, Utc::now()).is_err());
        assert!(hit_from_reply((1, -1, 10), &policy, Utc::now()).is_err());
    }
}
