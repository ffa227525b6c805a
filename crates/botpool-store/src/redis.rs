use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};

use crate::{StoreError, Subscription};

/// Redis-backed store. Commands go over one multiplexed connection;
/// each subscription opens its own pub/sub connection so dropping the
/// handle releases the channel.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect and ping. A failure here is fatal at startup.
    pub async fn connect(addr: &str, username: &str, password: &str) -> Result<Self, StoreError> {
        let url = connection_url(addr, username, password);
        let client = Client::open(url.as_str())
            .map_err(|e| StoreError::Connect(format!("{addr}: {e}")))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connect(format!("{addr}: {e}")))?;
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Connect(format!("{addr}: {e}")))?;
        Ok(Self { client, conn })
    }

    pub async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1).await?)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    pub async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    pub async fn set_nx_with_ttl(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    pub async fn hash_all(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    pub async fn list_pop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.lpop(key, None).await?)
    }

    pub async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    pub async fn list_len(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key).await?)
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let stream = pubsub.into_on_message();
        Ok(Subscription::redis(RedisSubscription {
            stream: Box::pin(stream),
        }))
    }
}

pub(crate) struct RedisSubscription {
    stream: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

impl RedisSubscription {
    pub(crate) async fn next_message(&mut self) -> Option<String> {
        loop {
            let msg = self.stream.next().await?;
            match msg.get_payload::<String>() {
                Ok(payload) => return Some(payload),
                Err(e) => {
                    tracing::debug!("non-utf8 pub/sub payload dropped: {e}");
                    continue;
                }
            }
        }
    }
}

fn connection_url(addr: &str, username: &str, password: &str) -> String {
    match (username.is_empty(), password.is_empty()) {
        (true, true) => format!("redis://{addr}/0"),
        (true, false) => format!("redis://:{password}@{addr}/0"),
        (false, _) => format!("redis://{username}:{password}@{addr}/0"),
    }
}

#[cfg(test)]
mod tests {
    use super::connection_url;

    #[test]
    fn url_shapes() {
        assert_eq!(connection_url("localhost:6379", "", ""), "redis://localhost:6379/0");
        assert_eq!(
            connection_url("localhost:6379", "", "pw"),
            "redis://:pw@localhost:6379/0"
        );
        assert_eq!(
            connection_url("localhost:6379", "user", "pw"),
            "redis://user:pw@localhost:6379/0"
        );
    }
}
