//! Redis-backed index cache.
//!
//! Keyed `sdch:index:{doc_id}`, value = serialized index artifact. The
//! cache is authoritative nowhere: every operation runs under a short
//! deadline and any failure is logged at warn level and swallowed, turning
//! into a miss (get) or a no-op (put/delete). Artifacts are rebuilt from
//! the durable chunk rows whenever the cache cannot help.

use redis::aio::ConnectionManager;
use std::time::Duration;
use uuid::Uuid;

use crate::config::CacheConfig;

const KEY_PREFIX: &str = "sdch:index:";

/// Best-effort artifact cache. Constructed once; `Clone` is cheap.
#[derive(Clone)]
pub struct IndexCache {
    conn: Option<ConnectionManager>,
    ttl_secs: Option<u64>,
    op_timeout: Duration,
}

impl IndexCache {
    /// Connect to Redis if a URL is configured. Connection failures
    /// degrade to a disabled cache rather than failing startup.
    pub async fn connect(url: Option<&str>, cfg: &CacheConfig) -> Self {
        let conn = match url {
            Some(url) => match Self::open(url).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    tracing::warn!("index cache unavailable, continuing without it: {}", e);
                    None
                }
            },
            None => None,
        };
        Self {
            conn,
            ttl_secs: cfg.ttl_secs,
            op_timeout: Duration::from_millis(cfg.op_timeout_ms),
        }
    }

    async fn open(url: &str) -> anyhow::Result<ConnectionManager> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(conn)
    }

    /// A cache that never hits; used when no store is configured and in
    /// tests.
    pub fn disabled() -> Self {
        Self {
            conn: None,
            ttl_secs: None,
            op_timeout: Duration::from_millis(1_000),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    fn key(doc_id: Uuid) -> String {
        format!("{}{}", KEY_PREFIX, doc_id)
    }

    pub async fn get(&self, doc_id: Uuid) -> Option<Vec<u8>> {
        let mut conn = self.conn.clone()?;
        let key = Self::key(doc_id);
        let op = async move {
            let mut cmd = redis::cmd("GET");
            cmd.arg(&key);
            let value: Option<Vec<u8>> = cmd.query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(value)
        };
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!(doc_id = %doc_id, "cache get failed: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!(doc_id = %doc_id, "cache get timed out");
                None
            }
        }
    }

    /// Idempotent write; duplicate puts are harmless.
    pub async fn put(&self, doc_id: Uuid, bytes: &[u8]) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let key = Self::key(doc_id);
        let ttl_secs = self.ttl_secs;
        let op = async move {
            let cmd = match ttl_secs {
                Some(ttl) => {
                    let mut cmd = redis::cmd("SETEX");
                    cmd.arg(&key).arg(ttl).arg(bytes);
                    cmd
                }
                None => {
                    let mut cmd = redis::cmd("SET");
                    cmd.arg(&key).arg(bytes);
                    cmd
                }
            };
            let _: () = cmd.query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(())
        };
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(doc_id = %doc_id, "cache put failed: {}", e),
            Err(_) => tracing::warn!(doc_id = %doc_id, "cache put timed out"),
        }
    }

    pub async fn delete(&self, doc_id: Uuid) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let key = Self::key(doc_id);
        let op = async move {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(&key);
            let _: () = cmd.query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(())
        };
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(doc_id = %doc_id, "cache delete failed: {}", e),
            Err(_) => tracing::warn!(doc_id = %doc_id, "cache delete timed out"),
        }
    }

    /// Health probe for the `/api/health` dependency report.
    pub async fn ping(&self) -> bool {
        let Some(mut conn) = self.conn.clone() else {
            return false;
        };
        let op = async move {
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(pong)
        };
        matches!(
            tokio::time::timeout(self.op_timeout, op).await,
            Ok(Ok(ref pong)) if pong == "PONG"
        )
    }
}
