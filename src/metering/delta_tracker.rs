//! 누적 카운터 → 증분 변환기
//!
//! 노드는 규칙별 누적 입출력 바이트를 `rule_{id}_in` / `rule_{id}_out` 키로 보고합니다.
//! 직전 보고값은 임시 저장소 해시 `node_traffic_last:{node_id}`에 보관하며
//! 필드는 `{id}_in` / `{id}_out` 입니다. 스냅샷은 판단 보조용일 뿐 원본 기록이 아닙니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::cache::{EphemeralStore, StoreError};

/// 스냅샷 보관 기간 (노드가 보고를 멈추면 7일 후 소멸)
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// 규칙별 트래픽 증분
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficDelta {
    pub bytes_in: i64,
    pub bytes_out: i64,
}

impl TrafficDelta {
    pub fn total(&self) -> i64 {
        self.bytes_in.saturating_add(self.bytes_out)
    }

    pub fn is_zero(&self) -> bool {
        self.bytes_in == 0 && self.bytes_out == 0
    }
}

/// 카운터 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDirection {
    In,
    Out,
}

/// `rule_{id}_in` / `rule_{id}_out` 키 해석. 형식이 맞지 않으면 None
pub fn parse_counter_key(key: &str) -> Option<(i64, CounterDirection)> {
    let mut parts = key.split('_');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("rule"), Some(id), Some(direction), None) => {
            let rule_id = id.parse::<i64>().ok().filter(|id| *id > 0)?;
            let direction = match direction {
                "in" => CounterDirection::In,
                "out" => CounterDirection::Out,
                _ => return None,
            };
            Some((rule_id, direction))
        }
        _ => None,
    }
}

/// 증분 계산 (음수면 카운터 리셋으로 보고 현재 누적값 전체를 증분으로 사용)
fn counter_delta(current: i64, last: i64) -> i64 {
    let delta = current.saturating_sub(last);
    if delta < 0 {
        current
    } else {
        delta
    }
}

fn snapshot_key(node_id: i64) -> String {
    format!("node_traffic_last:{}", node_id)
}

/// 노드별 카운터 증분 추적기
pub struct DeltaTracker {
    store: Arc<dyn EphemeralStore>,
    snapshot_ttl: Duration,
}

impl DeltaTracker {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self {
            store,
            snapshot_ttl: SNAPSHOT_TTL,
        }
    }

    /// 스냅샷 TTL 변경
    pub fn with_snapshot_ttl(mut self, snapshot_ttl: Duration) -> Self {
        self.snapshot_ttl = snapshot_ttl;
        self
    }

    /// 보고된 누적 카운터로부터 규칙별 증분 계산
    ///
    /// - 인식할 수 없는 키와 음수 값은 무시합니다.
    /// - 한 방향만 보고된 규칙은 나머지 방향을 0으로 간주합니다.
    /// - 증분이 양방향 모두 0인 규칙은 결과에서 제외합니다.
    /// - 스냅샷 조회 실패 시 빈 결과 대신 `StoreError`를 반환합니다.
    ///   스냅샷 저장 실패는 경고만 남기고 계산된 증분은 그대로 반환합니다.
    pub async fn compute_deltas(
        &self,
        node_id: i64,
        counters: &HashMap<String, i64>,
    ) -> Result<HashMap<i64, TrafficDelta>, StoreError> {
        let mut current: BTreeMap<i64, TrafficDelta> = BTreeMap::new();
        for (key, value) in counters {
            let Some((rule_id, direction)) = parse_counter_key(key) else {
                debug!("인식할 수 없는 카운터 키 무시: node={} key={}", node_id, key);
                continue;
            };
            if *value < 0 {
                debug!("음수 카운터 무시: node={} key={} value={}", node_id, key, value);
                continue;
            }

            let entry = current.entry(rule_id).or_default();
            match direction {
                CounterDirection::In => entry.bytes_in = *value,
                CounterDirection::Out => entry.bytes_out = *value,
            }
        }

        if current.is_empty() {
            return Ok(HashMap::new());
        }

        let key = snapshot_key(node_id);
        let fields: Vec<String> = current
            .keys()
            .flat_map(|rule_id| [format!("{}_in", rule_id), format!("{}_out", rule_id)])
            .collect();

        let last_values = self.store.hash_get_many(&key, &fields).await?;
        let parse_last = |index: usize| -> i64 {
            last_values
                .get(index)
                .and_then(|v| v.as_deref())
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
        };

        let mut deltas = HashMap::with_capacity(current.len());
        let mut snapshot = Vec::with_capacity(fields.len());

        for (index, (rule_id, counts)) in current.iter().enumerate() {
            let last_in = parse_last(index * 2);
            let last_out = parse_last(index * 2 + 1);

            let delta = TrafficDelta {
                bytes_in: counter_delta(counts.bytes_in, last_in),
                bytes_out: counter_delta(counts.bytes_out, last_out),
            };

            if counts.bytes_in < last_in || counts.bytes_out < last_out {
                debug!(
                    "카운터 리셋 감지: node={} rule={} in {}→{} out {}→{}",
                    node_id, rule_id, last_in, counts.bytes_in, last_out, counts.bytes_out
                );
            }

            if !delta.is_zero() {
                deltas.insert(*rule_id, delta);
            }

            snapshot.push((format!("{}_in", rule_id), counts.bytes_in.to_string()));
            snapshot.push((format!("{}_out", rule_id), counts.bytes_out.to_string()));
        }

        if let Err(e) = self.store.hash_set_many(&key, &snapshot, self.snapshot_ttl).await {
            warn!("카운터 스냅샷 저장 실패: node={} error={}", node_id, e);
        }

        debug!(
            "증분 계산 완료: node={} 보고 규칙 {}개, 증분 {}개",
            node_id,
            current.len(),
            deltas.len()
        );
        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn counters(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_parse_counter_key() {
        assert_eq!(parse_counter_key("rule_3_in"), Some((3, CounterDirection::In)));
        assert_eq!(parse_counter_key("rule_42_out"), Some((42, CounterDirection::Out)));

        let malformed = [
            "invalid_key",
            "rule_in",
            "rule_abc_in",
            "rule_3_up",
            "rule_3_in_x",
            "node_3_in",
            "rule_0_in",
            "rule_-1_in",
            "",
        ];
        for bad in malformed {
            assert_eq!(parse_counter_key(bad), None, "key {:?}", bad);
        }
    }

    #[test]
    fn test_counter_delta_reset_policy() {
        assert_eq!(counter_delta(1500, 1000), 500);
        assert_eq!(counter_delta(1000, 1000), 0);
        // 리셋: 현재값 전체
        assert_eq!(counter_delta(700, 1000), 700);
        assert_eq!(counter_delta(0, 1000), 0);
    }

    #[tokio::test]
    async fn test_first_report_yields_full_counters() {
        let tracker = DeltaTracker::new(Arc::new(MemoryStore::new()));

        let report = counters(&[
            ("rule_1_in", 1000),
            ("rule_1_out", 2000),
            ("rule_2_in", 3000),
            ("rule_2_out", 4000),
        ]);
        let deltas = tracker.compute_deltas(1, &report).await.unwrap();

        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[&1], TrafficDelta { bytes_in: 1000, bytes_out: 2000 });
        assert_eq!(deltas[&2], TrafficDelta { bytes_in: 3000, bytes_out: 4000 });
    }

    #[tokio::test]
    async fn test_counter_reset_after_node_restart() {
        let tracker = DeltaTracker::new(Arc::new(MemoryStore::new()));

        tracker
            .compute_deltas(1, &counters(&[("rule_3_in", 3000), ("rule_3_out", 2000)]))
            .await
            .unwrap();

        // 노드 재시작으로 카운터가 처음부터 다시 올라감
        let deltas = tracker.compute_deltas(1, &counters(&[("rule_3_in", 1500)])).await.unwrap();
        assert_eq!(deltas[&3], TrafficDelta { bytes_in: 1500, bytes_out: 0 });

        // 리셋 이후에는 새 기준값으로 증분 계산
        let deltas = tracker
            .compute_deltas(1, &counters(&[("rule_3_in", 1700), ("rule_3_out", 40)]))
            .await
            .unwrap();
        assert_eq!(deltas[&3], TrafficDelta { bytes_in: 200, bytes_out: 40 });
    }

    #[tokio::test]
    async fn test_unchanged_counters_omitted() {
        let tracker = DeltaTracker::new(Arc::new(MemoryStore::new()));
        let report = counters(&[("rule_5_in", 10), ("rule_5_out", 20)]);

        tracker.compute_deltas(9, &report).await.unwrap();
        let deltas = tracker.compute_deltas(9, &report).await.unwrap();

        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn test_only_invalid_keys_skip_store() {
        let store = Arc::new(MemoryStore::new());
        // 저장소가 죽어 있어도 인식 가능한 키가 없으면 에러가 아니어야 함
        store.set_offline(true);
        let tracker = DeltaTracker::new(store);

        let report = counters(&[("invalid_key", 1000), ("rule_in", 2000), ("rule_abc_in", 3000)]);
        let deltas = tracker.compute_deltas(1, &report).await.unwrap();

        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn test_store_unavailable_is_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let tracker = DeltaTracker::new(store);

        let err = tracker
            .compute_deltas(1, &counters(&[("rule_1_in", 1000)]))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_snapshots_are_per_node() {
        let tracker = DeltaTracker::new(Arc::new(MemoryStore::new()));

        tracker.compute_deltas(1, &counters(&[("rule_7_in", 500)])).await.unwrap();
        // 같은 규칙이라도 다른 노드의 첫 보고는 전체 값
        let deltas = tracker.compute_deltas(2, &counters(&[("rule_7_in", 300)])).await.unwrap();

        assert_eq!(deltas[&7], TrafficDelta { bytes_in: 300, bytes_out: 0 });
    }

    /// 조회는 되고 쓰기만 실패하는 저장소
    struct ReadOnlyStore(MemoryStore);

    #[async_trait::async_trait]
    impl EphemeralStore for ReadOnlyStore {
        async fn hash_get_many(
            &self,
            key: &str,
            fields: &[String],
        ) -> Result<Vec<Option<String>>, StoreError> {
            self.0.hash_get_many(key, fields).await
        }

        async fn hash_set_many(
            &self,
            _key: &str,
            _fields: &[(String, String)],
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only".to_string()))
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key).await
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only".to_string()))
        }

        async fn set_nx(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("read-only".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_still_returns_deltas() {
        let tracker = DeltaTracker::new(Arc::new(ReadOnlyStore(MemoryStore::new())));
        let report = counters(&[("rule_1_in", 100), ("rule_1_out", 50)]);

        let first = tracker.compute_deltas(1, &report).await.unwrap();
        assert_eq!(first[&1], TrafficDelta { bytes_in: 100, bytes_out: 50 });

        // 스냅샷이 저장되지 않았으므로 같은 보고가 다시 전체 증분으로 계산됨
        let second = tracker.compute_deltas(1, &report).await.unwrap();
        assert_eq!(second[&1], TrafficDelta { bytes_in: 100, bytes_out: 50 });
    }

    #[tokio::test]
    async fn test_monotonic_counters_sum_to_final_value() {
        let tracker = DeltaTracker::new(Arc::new(MemoryStore::new()));
        let mut total_in = 0;

        for value in [0, 10, 10, 250, 1_000, 1_001] {
            let report = counters(&[("rule_2_in", value)]);
            let deltas = tracker.compute_deltas(4, &report).await.unwrap();
            if let Some(delta) = deltas.get(&2) {
                assert!(delta.bytes_in > 0);
                total_in += delta.bytes_in;
            }
        }

        assert_eq!(total_in, 1_001);
    }

    #[tokio::test]
    async fn test_negative_values_ignored() {
        let tracker = DeltaTracker::new(Arc::new(MemoryStore::new()));

        let deltas = tracker
            .compute_deltas(1, &counters(&[("rule_1_in", -50), ("rule_1_out", 80)]))
            .await
            .unwrap();

        assert_eq!(deltas[&1], TrafficDelta { bytes_in: 0, bytes_out: 80 });
    }
}
