//! Redis-backed fulfillment lock.
//!
//! Acquire is a single `SET key token NX PX ttl`. Release deletes the key
//! only if it still holds our token, so a worker whose lease expired cannot
//! free a lock somebody else has since taken.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use crate::error::AppError;
use crate::ports::{DistributedLock, LockLease};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisLock {
    conn: MultiplexedConnection,
}

impl RedisLock {
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(Self { conn })
    }
}

/// 16 random bytes, hex encoded.
pub fn new_lock_token() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, AppError> {
        let mut conn = self.conn.clone();
        let token = new_lock_token();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| LockLease {
            key: key.to_string(),
            token,
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let deleted: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            tracing::warn!("Lock {} had already expired or changed hands", lease.key);
        }
        Ok(())
    }
}
