//! 노드 프로브 데이터 (DB에 저장하지 않고 임시 저장소에만 캐시)

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{EphemeralStore, StoreError};

/// 프로브 캐시 기본 TTL (5분)
pub const PROBE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub usage_percent: f64,
    pub cores: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    pub usage_percent: f64,
}

/// 네트워크 인터페이스별 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_speed: u64,
    pub tx_speed: u64,
}

/// 노드가 보고하는 시스템 상태
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeData {
    pub timestamp: i64,
    #[serde(default)]
    pub cpu: CpuInfo,
    #[serde(default)]
    pub memory: MemoryInfo,
    #[serde(default)]
    pub network: Vec<NetworkInfo>,
}

/// 프로브 캐시 (`node_probe:{node_id}`, JSON)
pub struct ProbeCache {
    store: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl ProbeCache {
    pub fn new(store: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(node_id: i64) -> String {
        format!("node_probe:{}", node_id)
    }

    pub async fn save(&self, node_id: i64, probe: &ProbeData) -> Result<(), StoreError> {
        let payload = serde_json::to_string(probe)?;
        self.store.set(&Self::key(node_id), &payload, self.ttl).await
    }

    pub async fn load(&self, node_id: i64) -> Result<Option<ProbeData>, StoreError> {
        match self.store.get(&Self::key(node_id)).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
