use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;

use super::ephemeral_store::{EphemeralStore, StoreError};

/// 프로세스 내부 임시 저장소
///
/// Redis 없이 단일 인스턴스로 실행할 때와 테스트에서 사용합니다.
/// 만료는 조회 시점에 판단하고, 쓰기 때마다 만료된 엔트리를 함께 정리합니다.
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
    offline: AtomicBool,
}

/// 저장 엔트리
#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
enum StoredValue {
    Plain(String),
    Hash(HashMap<String, String>),
}

impl StoredEntry {
    fn new(value: StoredValue, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// 장애 모드 전환. 켜져 있으면 모든 연산이 Unavailable을 반환
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// 만료되지 않은 키 개수
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    /// 보고를 멈춘 노드의 스냅샷처럼 다시 읽히지 않는 키도 제거
    fn purge_expired(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("만료 키 {}개 정리", removed);
        }
    }

    /// 만료된 엔트리 제거 후 살아있는 엔트리 복사본 반환
    fn live_entry(&self, key: &str) -> Option<StoredEntry> {
        let entry = self.entries.get(key)?.value().clone();
        if entry.is_expired() {
            self.entries.remove_if(key, |_, e| e.is_expired());
            debug!("만료 키 제거: {}", key);
            return None;
        }
        Some(entry)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EphemeralStore for MemoryStore {
    async fn hash_get_many(
        &self,
        key: &str,
        fields: &[String],
    ) -> Result<Vec<Option<String>>, StoreError> {
        self.check_online()?;

        let values = match self.live_entry(key) {
            Some(StoredEntry { value: StoredValue::Hash(hash), .. }) => {
                fields.iter().map(|f| hash.get(f).cloned()).collect()
            }
            _ => vec![None; fields.len()],
        };
        Ok(values)
    }

    async fn hash_set_many(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        self.purge_expired();

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry::new(StoredValue::Hash(HashMap::new()), ttl));

        if entry.is_expired() || !matches!(entry.value, StoredValue::Hash(_)) {
            *entry = StoredEntry::new(StoredValue::Hash(HashMap::new()), ttl);
        }

        if let StoredValue::Hash(hash) = &mut entry.value {
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
        }
        entry.expires_at = Instant::now() + ttl;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_online()?;

        match self.live_entry(key) {
            Some(StoredEntry { value: StoredValue::Plain(value), .. }) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_online()?;
        self.purge_expired();

        self.entries.insert(
            key.to_string(),
            StoredEntry::new(StoredValue::Plain(value.to_string()), ttl),
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_online()?;

        let fresh = StoredEntry::new(StoredValue::Plain(value.to_string()), ttl);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_online()?;

        self.entries.remove(key);
        Ok(())
    }
}
