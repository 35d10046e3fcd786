use std::sync::Arc;

use redis::RedisError;
use redis::RedisResult;
use redis::aio::MultiplexedConnection;
use tracing::warn;

use crate::core::Store;
use crate::store::KEY_PREFIX;
use crate::store::MsgId;
use crate::store::Subkey;

const DEFAULT_SCAN_BATCH: usize = 256;

/// Deduplication store client over a single-primary Redis.
///
/// One multiplexed connection is opened per operation; the Redis primary
/// provides the per-msg-id linearizability the `Store` contract requires.
#[derive(Clone)]
pub struct RedisStore {
    redis_url: Arc<str>,
    client: redis::Client,
    scan_batch: usize,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("redis_url", &self.redis_url).finish()
    }
}

impl RedisStore {
    pub fn new(redis_url: impl Into<Arc<str>>) -> RedisResult<Self> {
        let redis_url = redis_url.into();
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self { redis_url, client, scan_batch: DEFAULT_SCAN_BATCH })
    }

    pub async fn connect(redis_url: impl Into<Arc<str>>) -> RedisResult<Self> {
        let store = Self::new(redis_url)?;
        let _ = store.ping().await?;
        Ok(store)
    }

    pub fn redis_url(&self) -> &str { self.redis_url.as_ref() }

    pub fn with_scan_batch(mut self, scan_batch: usize) -> Self {
        self.scan_batch = scan_batch.max(1);
        self
    }

    pub async fn get_multiplexed_connection(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    pub async fn ping(&self) -> RedisResult<String> {
        let mut conn = self.get_multiplexed_connection().await?;
        redis::cmd("PING").query_async(&mut conn).await
    }
}

impl Store for RedisStore {
    type Error = RedisError;

    async fn get(&self, msg_id: &MsgId, sub: Subkey) -> Result<Option<String>, Self::Error> {
        let mut conn = self.get_multiplexed_connection().await?;
        redis::cmd("GET").arg(msg_id.key(sub)).query_async(&mut conn).await
    }

    async fn set(&self, msg_id: &MsgId, sub: Subkey, value: &str) -> Result<(), Self::Error> {
        let mut conn = self.get_multiplexed_connection().await?;
        redis::cmd("SET").arg(msg_id.key(sub)).arg(value).query_async(&mut conn).await
    }

    async fn setnx(&self, msg_id: &MsgId, sub: Subkey, value: &str) -> Result<bool, Self::Error> {
        let mut conn = self.get_multiplexed_connection().await?;
        let created: i64 = redis::cmd("SETNX").arg(msg_id.key(sub)).arg(value).query_async(&mut conn).await?;
        Ok(created == 1)
    }

    async fn msetnx(&self, msg_id: &MsgId, pairs: &[(Subkey, String)]) -> Result<bool, Self::Error> {
        let mut conn = self.get_multiplexed_connection().await?;
        let mut cmd = redis::cmd("MSETNX");
        for (sub, value) in pairs {
            cmd.arg(msg_id.key(*sub)).arg(value);
        }

        let created: i64 = cmd.query_async(&mut conn).await?;
        Ok(created == 1)
    }

    async fn incr(&self, msg_id: &MsgId, sub: Subkey) -> Result<i64, Self::Error> {
        let mut conn = self.get_multiplexed_connection().await?;
        redis::cmd("INCR").arg(msg_id.key(sub)).query_async(&mut conn).await
    }

    async fn del(&self, msg_id: &MsgId, sub: Subkey) -> Result<(), Self::Error> {
        let mut conn = self.get_multiplexed_connection().await?;
        let _deleted: i64 = redis::cmd("DEL").arg(msg_id.key(sub)).query_async(&mut conn).await?;
        Ok(())
    }

    async fn del_keys(&self, msg_id: &MsgId) -> Result<(), Self::Error> {
        let mut conn = self.get_multiplexed_connection().await?;
        let mut cmd = redis::cmd("DEL");
        for sub in Subkey::ALL {
            cmd.arg(msg_id.key(sub));
        }

        let _deleted: i64 = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn exists(&self, msg_id: &MsgId, sub: Subkey) -> Result<bool, Self::Error> {
        let mut conn = self.get_multiplexed_connection().await?;
        let present: i64 = redis::cmd("EXISTS").arg(msg_id.key(sub)).query_async(&mut conn).await?;
        Ok(present > 0)
    }

    async fn keys(&self, msg_id: &MsgId) -> Result<Vec<Subkey>, Self::Error> {
        let mut conn = self.get_multiplexed_connection().await?;
        let mut cmd = redis::cmd("MGET");
        for sub in Subkey::ALL {
            cmd.arg(msg_id.key(sub));
        }

        let values: Vec<Option<String>> = cmd.query_async(&mut conn).await?;
        Ok(Subkey::ALL.into_iter().zip(values).filter_map(|(sub, value)| value.map(|_| sub)).collect())
    }

    async fn garbage_collect(&self, older_than: u64) -> Result<usize, Self::Error> {
        let mut conn = self.get_multiplexed_connection().await?;
        let pattern = format!("{KEY_PREFIX}:*:expires");
        let mut cursor = 0_u64;
        let mut collected = 0_usize;

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.scan_batch)
                .query_async(&mut conn)
                .await?;

            for key in batch {
                let Some((msg_id, Subkey::Expires)) = MsgId::from_key(&key) else {
                    warn!(key = %key, "skipping unparseable expiry key during garbage collection");
                    continue;
                };

                let expires: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
                let Some(expires) = expires.and_then(|value| value.parse::<u64>().ok()) else {
                    continue;
                };

                if expires <= older_than {
                    self.del_keys(&msg_id).await?;
                    collected += 1;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                return Ok(collected);
            }
        }
    }
}
