use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::config::Config;
use crate::error::AppResult;

/// Prefixed JSON cache. Reads and writes never fail the caller: a miss or a
/// Redis error both look like "not cached".
#[derive(Clone)]
pub struct Cache {
    conn: Option<ConnectionManager>,
    prefix: String,
}

impl Cache {
    pub async fn connect(config: &Config) -> AppResult<Self> {
        let client = Client::open(config.redis_url())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn: Some(conn),
            prefix: config.redis.key_prefix.clone(),
        })
    }

    /// A cache that stores nothing, used when Redis is unreachable at boot.
    pub fn disabled(prefix: &str) -> Self {
        Self {
            conn: None,
            prefix: prefix.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    fn key(&self, k: &str) -> String {
        format!("{}{}", self.prefix, k)
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone()?;
        redis::cmd("GET")
            .arg(self.key(key))
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .ok()
            .flatten()
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .await
            .and_then(|s| serde_json::from_str(&s).ok())
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let k = self.key(key);
        let result: Result<(), _> = if ttl_secs > 0 {
            conn.set_ex(&k, value, ttl_secs).await
        } else {
            conn.set(&k, value).await
        };
        if let Err(e) = result {
            tracing::warn!(key = %k, error = %e, "cache write failed");
        }
    }

    pub async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        if let Ok(json) = serde_json::to_string(value) {
            self.set(key, &json, ttl_secs).await;
        }
    }

    pub async fn del(&self, key: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let _: Result<(), _> = conn.del(self.key(key)).await;
    }

    pub async fn health_check(&self) -> bool {
        let Some(mut conn) = self.conn.clone() else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_is_a_silent_miss() {
        let cache = Cache::disabled("test:");
        assert!(!cache.is_enabled());
        cache.set_json("challenges:active", &vec![1, 2, 3], 30).await;
        assert_eq!(cache.get_json::<Vec<i32>>("challenges:active").await, None);
        assert!(!cache.health_check().await);
        assert_eq!(cache.key("x"), "test:x");
    }
}
