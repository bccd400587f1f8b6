//! 릴레이 노드 관련 기능: 인증, 프로브 캐시, 노드 설정 생성

pub mod config;
pub mod probe;

use sqlx::sqlite::SqlitePool;
use thiserror::Error;

use crate::db::{NodeRecord, NodeRepository};

pub use config::{
    GostConfig, IpTablesConfig, NodeConfig, NodeConfigBuilder, NodeRuleConfig, NodeTarget,
    RuleProtocolConfig,
};
pub use probe::{CpuInfo, MemoryInfo, NetworkInfo, ProbeCache, ProbeData, PROBE_TTL};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("유효하지 않은 노드 인증 정보: node={0}")]
    Unauthorized(i64),

    #[error("데이터베이스 에러: {0}")]
    Database(#[from] sqlx::Error),
}

/// 노드 ID와 비밀키로 인증. 노드가 없거나 비밀키가 다르면 `Unauthorized`
pub async fn authenticate(
    pool: &SqlitePool,
    node_id: i64,
    secret: &str,
) -> Result<NodeRecord, NodeError> {
    let node = NodeRepository::new(pool.clone()).find_by_id(node_id).await?;

    match node {
        Some(node) if !secret.is_empty() && node.secret == secret => Ok(node),
        _ => Err(NodeError::Unauthorized(node_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;

    #[tokio::test]
    async fn test_authenticate() {
        let pool = init_database("sqlite::memory:", 1).await.unwrap();
        let node_id = NodeRepository::new(pool.clone())
            .create("jp-01", "jp.example.com", 443, "s3cret", &["gost"])
            .await
            .unwrap();

        let node = authenticate(&pool, node_id, "s3cret").await.unwrap();
        assert_eq!(node.name, "jp-01");

        let wrong = authenticate(&pool, node_id, "wrong").await;
        assert!(matches!(wrong, Err(NodeError::Unauthorized(id)) if id == node_id));

        let missing = authenticate(&pool, 999, "s3cret").await;
        assert!(matches!(missing, Err(NodeError::Unauthorized(999))));

        let empty = authenticate(&pool, node_id, "").await;
        assert!(matches!(empty, Err(NodeError::Unauthorized(_))));
    }
}
