//! Redis-backed counters, the shared primary tier.
//!
//! The gated increment runs as one Lua script so that read, compare, INCR and
//! EXPIREAT happen in a single round trip. Two concurrent requests for the same
//! key can therefore never both see `count < ceiling` and overshoot.
//!
//! The managed connection reconnects on its own once established. If Redis is
//! down at startup the first connection is retried lazily from request traffic.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use tokio::sync::OnceCell;
use tracing::info;

use super::store::{CounterStore, Increment, StoreError};
use super::UsageKey;

/// KEYS[1]: counter key
/// ARGV[1]: ceiling
/// ARGV[2]: expiry (unix seconds)
///
/// Returns {applied (0/1), count after the call}
const GATED_INCREMENT_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local ceiling = tonumber(ARGV[1])
if current >= ceiling then
  return {0, current}
end
local updated = redis.call('INCR', KEYS[1])
redis.call('EXPIREAT', KEYS[1], ARGV[2])
return {1, updated}
"#;

pub struct RedisCounterStore {
  client: redis::Client,
  conn: OnceCell<ConnectionManager>,
  connect_timeout: Duration,
  reconnect_every: Duration,
  last_attempt: Mutex<Option<Instant>>,
  gated_increment: Script,
}

impl RedisCounterStore {
  /// Parse the URL only. The connection is opened on first use and retried
  /// at most once per `reconnect_every` while the server stays unreachable.
  pub fn new(url: &str, connect_timeout: Duration, reconnect_every: Duration) -> Result<Self, StoreError> {
    let client = redis::Client::open(url).map_err(transport)?;
    Ok(Self {
      client,
      conn: OnceCell::new(),
      connect_timeout,
      reconnect_every,
      last_attempt: Mutex::new(None),
      gated_increment: Script::new(GATED_INCREMENT_SCRIPT),
    })
  }

  /// Open the connection now; the store stays usable (and retries later) on failure.
  pub async fn warm_up(&self) -> Result<(), StoreError> {
    self.connection().await.map(|_| ())
  }

  async fn connection(&self) -> Result<ConnectionManager, StoreError> {
    if let Some(conn) = self.conn.get() {
      return Ok(conn.clone());
    }
    {
      let mut last = self.last_attempt.lock().map_err(|_| StoreError::Unavailable("connect state poisoned".into()))?;
      if let Some(at) = *last {
        if at.elapsed() < self.reconnect_every {
          return Err(StoreError::Unavailable("waiting before reconnecting".into()));
        }
      }
      *last = Some(Instant::now());
    }

    let conn = self
      .conn
      .get_or_try_init(|| async {
        let mut conn = tokio::time::timeout(self.connect_timeout, ConnectionManager::new(self.client.clone()))
          .await
          .map_err(|_| StoreError::Timeout(self.connect_timeout))?
          .map_err(transport)?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(transport)?;
        info!(target: "quota", reply = %pong, "Connected to Redis counter store");
        Ok::<_, StoreError>(conn)
      })
      .await?;
    Ok(conn.clone())
  }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
  async fn get(&self, key: &UsageKey) -> Result<u32, StoreError> {
    let mut conn = self.connection().await?;
    let value: Option<i64> = redis::cmd("GET")
      .arg(key.storage_key())
      .query_async(&mut conn)
      .await
      .map_err(transport)?;
    Ok(clamp_count(value.unwrap_or(0)))
  }

  async fn increment_with_expiry(
    &self,
    key: &UsageKey,
    ceiling: u32,
    expire_at: DateTime<Utc>,
  ) -> Result<Increment, StoreError> {
    let mut conn = self.connection().await?;
    let reply: Vec<i64> = self
      .gated_increment
      .key(key.storage_key())
      .arg(ceiling)
      .arg(expire_at.timestamp())
      .invoke_async(&mut conn)
      .await
      .map_err(transport)?;
    decode_reply(&reply)
  }

  fn name(&self) -> &'static str { "redis" }
}

fn transport(e: RedisError) -> StoreError {
  StoreError::Unavailable(e.to_string())
}

fn clamp_count(v: i64) -> u32 {
  u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

fn decode_reply(reply: &[i64]) -> Result<Increment, StoreError> {
  match reply {
    [1, count] => Ok(Increment::Applied(clamp_count(*count))),
    [0, count] => Ok(Increment::AtCeiling(clamp_count(*count))),
    other => Err(StoreError::Protocol(format!("gated increment returned {:?}", other))),
  }
}
