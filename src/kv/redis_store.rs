use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

use super::{Counter, KvStore};
use crate::error::KvError;

/// Redis-backed store shared by every server instance.
#[derive(Clone)]
pub struct RedisKv {
    connection: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> Result<Self, KvError> {
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

fn remaining(pttl_ms: i64) -> Duration {
    Duration::from_millis(pttl_ms.max(0) as u64)
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut connection = self.connection.clone();
        Ok(connection.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut connection = self.connection.clone();
        let seconds = ttl.as_secs().max(1);
        connection.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn counter(&self, key: &str) -> Result<Option<Counter>, KvError> {
        let mut connection = self.connection.clone();
        let (value, pttl): (Option<String>, i64) = redis::pipe()
            .get(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut connection)
            .await?;

        match value {
            Some(value) => Ok(Some(Counter {
                count: value
                    .parse()
                    .map_err(|_| KvError::NotACounter(key.to_string()))?,
                resets_in: remaining(pttl),
            })),
            None => Ok(None),
        }
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<Counter, KvError> {
        let mut connection = self.connection.clone();
        // EXPIRE NX only sets the TTL when the key has none, i.e. on the
        // increment that created it.
        let (count, pttl): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window.as_millis() as u64)
            .arg("NX")
            .ignore()
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut connection)
            .await?;

        Ok(Counter {
            count,
            resets_in: remaining(pttl),
        })
    }
}
