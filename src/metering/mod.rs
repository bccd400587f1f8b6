//! 트래픽 계량 모듈
//!
//! 노드가 보고한 누적 카운터를 증분으로 변환하고(`DeltaTracker`),
//! 규칙별 사용량 원장에 상한을 적용해 반영합니다(`QuotaLedger`).

pub mod delta_tracker;
pub mod heartbeat;
pub mod quota_ledger;

pub use delta_tracker::{parse_counter_key, CounterDirection, DeltaTracker, TrafficDelta};
pub use heartbeat::{HeartbeatError, HeartbeatOutcome, HeartbeatProcessor, HeartbeatReport};
pub use quota_ledger::{LedgerError, QuotaLedger, MAX_DELTA_PER_CALL};
