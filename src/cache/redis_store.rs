//! Redis 기반 임시 저장소
//!
//! 연결은 첫 사용 시점에 맺고, 실패하면 다음 호출에서 다시 시도합니다.
//! 서버 기동 시 Redis가 내려가 있어도 프로세스는 정상 기동되어야 합니다.
//! 연결 시도는 시간 제한이 있고, 실패 직후에는 재시도 없이 바로 Unavailable을 돌려줍니다.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{info, warn};
use redis::aio::ConnectionManager;
use redis::Client;

use super::ephemeral_store::{EphemeralStore, StoreError};

/// 연결 시도 1회의 최대 대기 시간
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// 연결 실패 후 재시도를 보류하는 시간
pub const RECONNECT_COOLDOWN: Duration = Duration::from_secs(2);

#[derive(Default)]
struct ConnectionState {
    manager: Option<ConnectionManager>,
    last_failure: Option<Instant>,
}

/// Redis 저장소
pub struct RedisStore {
    client: Client,
    state: Mutex<ConnectionState>,
    connect_timeout: Duration,
    reconnect_cooldown: Duration,
}

impl RedisStore {
    /// 새 저장소 생성 (URL 검증만 수행, 실제 연결은 지연)
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            state: Mutex::new(ConnectionState::default()),
            connect_timeout: CONNECT_TIMEOUT,
            reconnect_cooldown: RECONNECT_COOLDOWN,
        })
    }

    pub fn with_timeouts(
        mut self,
        connect_timeout: Duration,
        reconnect_cooldown: Duration,
    ) -> Self {
        self.connect_timeout = connect_timeout;
        self.reconnect_cooldown = reconnect_cooldown;
        self
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        // 상태 갱신 중 패닉이 나도 값 자체는 항상 유효함
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 캐시된 연결 반환. 없으면 락 밖에서 새로 연결
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        {
            let state = self.lock_state();
            if let Some(conn) = state.manager.as_ref() {
                return Ok(conn.clone());
            }
            if let Some(failed_at) = state.last_failure {
                if failed_at.elapsed() < self.reconnect_cooldown {
                    return Err(StoreError::Unavailable("redis reconnect cooling down".to_string()));
                }
            }
        }

        // 재시도 1회, 짧은 백오프
        let connect = ConnectionManager::new_with_backoff(self.client.clone(), 2, 100, 1);
        let result = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(StoreError::from(e)),
            Err(_) => Err(StoreError::Unavailable(format!(
                "redis connect timed out after {:?}",
                self.connect_timeout
            ))),
        };

        let mut state = self.lock_state();
        match result {
            Ok(conn) => {
                info!("Redis 연결 완료");
                // 동시에 연결한 다른 호출이 있으면 먼저 저장된 연결을 사용
                let conn = state.manager.get_or_insert(conn).clone();
                state.last_failure = None;
                Ok(conn)
            }
            Err(e) => {
                warn!("Redis 연결 실패: {}", e);
                state.last_failure = Some(Instant::now());
                Err(e)
            }
        }
    }
}

#[async_trait::async_trait]
impl EphemeralStore for RedisStore {
    async fn hash_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, StoreError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection().await?;
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn hash_set_many(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;

        // HSET + EXPIRE를 하나의 MULTI/EXEC로 실행
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("HSET").arg(key);
        for (field, value) in fields {
            pipe.arg(field).arg(value);
        }
        pipe.ignore();
        pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs()).ignore();

        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;

        // SET key value NX EX ttl: 성공 시 "OK", 이미 있으면 nil
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

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisStore::new("not-a-redis-url").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // 닫힌 포트: 연결 실패가 Unavailable로 보고되어야 함
        let store = RedisStore::new("redis://127.0.0.1:1/").unwrap();
        let err = store.set_nx("order:lock:T1", "1", Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_fast_for_concurrent_callers() {
        let store = RedisStore::new("redis://127.0.0.1:1/").unwrap();
        let ttl = Duration::from_secs(10);
        let fields = ["3_in".to_string()];
        let started = Instant::now();

        let (a, b, c) = tokio::join!(
            store.set_nx("order:lock:T1", "1", ttl),
            store.set_nx("order:lock:T2", "1", ttl),
            store.hash_get_many("node_traffic_last:1", &fields),
        );

        assert!(matches!(a, Err(StoreError::Unavailable(_))));
        assert!(matches!(b, Err(StoreError::Unavailable(_))));
        assert!(matches!(c, Err(StoreError::Unavailable(_))));
        // 호출들이 서로의 연결 시도를 기다리며 직렬화되지 않아야 함
        assert!(started.elapsed() < CONNECT_TIMEOUT * 2, "took {:?}", started.elapsed());

        // 실패 직후에는 연결을 다시 시도하지 않음
        let retry = Instant::now();
        assert!(store.get("node_probe:1").await.is_err());
        assert!(retry.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_reconnect_attempted_after_cooldown() {
        let store = RedisStore::new("redis://127.0.0.1:1/")
            .unwrap()
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(30));

        assert!(store.get("k").await.is_err());
        let first_failure = store.lock_state().last_failure.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get("k").await.is_err());
        assert!(store.lock_state().last_failure.unwrap() > first_failure);
    }
}
