use std::time::Duration;

/// 임시 저장소 트레이트
///
/// Redis 호환 저장소가 제공하는 최소 기능만 정의합니다.
/// 해시 조회/저장(TTL 갱신 포함), 단일 값 조회/저장, 원자적 set-if-absent, 삭제.
#[async_trait::async_trait]
pub trait EphemeralStore: Send + Sync {
    /// 해시의 여러 필드를 한 번에 조회 (없는 필드는 None)
    async fn hash_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, StoreError>;

    /// 해시 필드 일괄 저장 후 키 TTL 갱신
    async fn hash_set_many(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// 키가 없을 때만 저장. 저장했으면 true
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// 임시 저장소 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("임시 저장소 사용 불가: {0}")]
    Unavailable(String),
    #[error("직렬화 오류: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}
