//! 노드 하트비트 처리
//!
//! 인증 → 노드 상태 갱신 → 프로브 캐시 → 증분 계산 → 사용량 반영 → 로그 기록.
//! 임시 저장소나 개별 규칙 반영이 실패해도 하트비트 자체는 성공으로 처리합니다.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::EphemeralStore;
use crate::config::MeteringConfig;
use crate::db::NodeRepository;
use crate::metering::{DeltaTracker, QuotaLedger};
use crate::node::{self, NodeError, ProbeCache, ProbeData};

/// 노드 하트비트 페이로드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub node_id: i64,
    pub secret: String,
    #[serde(default)]
    pub probe: Option<ProbeData>,
    /// `rule_{id}_in` / `rule_{id}_out` → 누적 바이트
    #[serde(default)]
    pub traffic_stats: HashMap<String, i64>,
}

/// 하트비트 처리 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeartbeatOutcome {
    /// 사용량이 반영된 규칙 수
    pub rules_updated: usize,
    /// 한도 도달로 비활성 상태인 규칙 ID
    pub rules_disabled: Vec<i64>,
    /// 임시 저장소 장애로 이번 주기 계량을 건너뛰었는지 여부
    pub accounting_skipped: bool,
}

#[derive(Error, Debug)]
pub enum HeartbeatError {
    #[error("유효하지 않은 노드 인증 정보: node={0}")]
    Unauthorized(i64),

    #[error("데이터베이스 에러: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<NodeError> for HeartbeatError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Unauthorized(node_id) => HeartbeatError::Unauthorized(node_id),
            NodeError::Database(e) => HeartbeatError::Database(e),
        }
    }
}

/// 하트비트 처리기
pub struct HeartbeatProcessor {
    pool: SqlitePool,
    nodes: NodeRepository,
    tracker: DeltaTracker,
    ledger: QuotaLedger,
    probes: ProbeCache,
}

impl HeartbeatProcessor {
    pub fn new(pool: SqlitePool, store: Arc<dyn EphemeralStore>, config: &MeteringConfig) -> Self {
        Self {
            nodes: NodeRepository::new(pool.clone()),
            tracker: DeltaTracker::new(store.clone()).with_snapshot_ttl(config.snapshot_ttl),
            ledger: QuotaLedger::with_max_delta(pool.clone(), config.max_delta_per_call),
            probes: ProbeCache::new(store, config.probe_ttl),
            pool,
        }
    }

    pub fn probes(&self) -> &ProbeCache {
        &self.probes
    }

    /// 하트비트 1건 처리. 모든 로그에 `request_id`를 붙임
    pub async fn process(
        &self,
        request_id: &Uuid,
        report: &HeartbeatReport,
    ) -> Result<HeartbeatOutcome, HeartbeatError> {
        let node = node::authenticate(&self.pool, report.node_id, &report.secret).await?;

        let now = chrono::Utc::now().timestamp();
        self.nodes.update_status(node.id, "online", now).await?;

        if let Some(probe) = &report.probe {
            if let Err(e) = self.probes.save(node.id, probe).await {
                warn!("[{}] 프로브 데이터 저장 실패: node={} error={}", request_id, node.id, e);
            }
        }

        let mut outcome = HeartbeatOutcome::default();
        if report.traffic_stats.is_empty() {
            return Ok(outcome);
        }

        let deltas = match self.tracker.compute_deltas(node.id, &report.traffic_stats).await {
            Ok(deltas) => deltas,
            Err(e) => {
                warn!(
                    "[{}] 트래픽 증분 계산 실패, 이번 주기 계량 생략: node={} error={}",
                    request_id, node.id, e
                );
                outcome.accounting_skipped = true;
                return Ok(outcome);
            }
        };

        let mut rule_ids: Vec<i64> = deltas.keys().copied().collect();
        rule_ids.sort_unstable();

        for rule_id in rule_ids {
            let delta = deltas[&rule_id];
            let total = delta.total();
            if total <= 0 {
                continue;
            }

            let disabled = match self.ledger.apply_delta(rule_id, total).await {
                Ok(disabled) => disabled,
                Err(e) => {
                    warn!(
                        "[{}] 사용량 반영 실패: node={} rule={} error={}",
                        request_id, node.id, rule_id, e
                    );
                    continue;
                }
            };

            outcome.rules_updated += 1;
            if disabled {
                warn!(
                    "[{}] ⛔ 트래픽 한도 도달로 규칙 비활성화: node={} rule={}",
                    request_id, node.id, rule_id
                );
                outcome.rules_disabled.push(rule_id);
            }

            if let Err(e) = self.ledger.append_traffic_log(rule_id, node.id, &delta, now).await {
                warn!(
                    "[{}] 트래픽 로그 기록 실패: node={} rule={} error={}",
                    request_id, node.id, rule_id, e
                );
            }
        }

        debug!(
            "[{}] 트래픽 반영 완료: node={} rules={} disabled={}",
            request_id,
            node.id,
            outcome.rules_updated,
            outcome.rules_disabled.len()
        );
        info!("[{}] 💓 하트비트 처리 완료: node={} ({})", request_id, node.id, node.name);

        Ok(outcome)
    }
}
