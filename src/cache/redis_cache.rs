use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::backend::{CacheBackend, CacheResult, MessageStream};

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

const HSET_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    redis.call('HSET', KEYS[1], unpack(ARGV))
    return 1
else
    return 0
end
"#;

/// Redis implementation of CacheBackend
///
/// Commands share one multiplexed connection; each subscription opens its
/// own pub/sub connection.
#[derive(Clone)]
pub struct RedisCache {
    client: Client,
    connection: MultiplexedConnection,
}

impl RedisCache {
    /// Connects to Redis, e.g. `RedisCache::connect("redis://127.0.0.1/")`
    #[instrument]
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = Client::open(url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        info!("Connected to Redis cache");
        Ok(Self { client, connection })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut self.conn())
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, keys: &[&str]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let _: () = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let script = Script::new(COMPARE_AND_DELETE);
        let deleted: i64 = script
            .key(key)
            .arg(expected)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(deleted == 1)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        let _: () = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _: () = cmd.query_async(&mut self.conn()).await?;
        Ok(())
    }

    async fn hset_existing(&self, key: &str, fields: &[(String, String)]) -> CacheResult<bool> {
        if fields.is_empty() {
            return Ok(false);
        }
        let script = Script::new(HSET_IF_EXISTS);
        let mut invocation = script.key(key);
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }
        let written: i64 = invocation.invoke_async(&mut self.conn()).await?;
        Ok(written == 1)
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let _: () = redis::cmd("HDEL")
            .arg(key)
            .arg(fields)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let hash: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(hash)
    }

    async fn sadd(&self, key: &str, member: &str) -> CacheResult<()> {
        let _: () = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> CacheResult<()> {
        let _: () = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(members)
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        let is_member: bool = redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(is_member)
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> CacheResult<()> {
        let _: () = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        info!(channel = %channel, "Subscribed to Redis channel");

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let channel = channel.clone();
            async move {
                match msg.get_payload::<Vec<u8>>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Redis payload decode error");
                        None
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
