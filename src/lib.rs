//! relaymeter: 릴레이 노드 트래픽 계량 및 결제 정산 엔진
//!
//! - `metering`: 노드 누적 카운터 → 증분 → 규칙별 사용량 장부
//! - `settlement`: 결제 완료 통지의 1회 정산
//! - `node`: 노드 인증, 프로브 캐시, 노드 설정 생성

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod metering;
pub mod node;
pub mod server;
pub mod settlement;

pub use config::AppConfig;
pub use server::{build_app, start_server, ServerState};
