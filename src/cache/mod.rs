//! 임시 공유 키-값 저장소 모듈
//!
//! 노드별 카운터 스냅샷, 프로브 데이터, 정산 락처럼 TTL 기반으로
//! 잠시 보관하는 데이터를 다룹니다. 시스템 기록 원본(SQLite)이 아닙니다.

pub mod ephemeral_store;
pub mod memory_store;
pub mod redis_store;

pub use ephemeral_store::{EphemeralStore, StoreError};
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
