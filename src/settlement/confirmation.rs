//! 결제 완료 통지 처리
//!
//! 서명 검증은 상위 계층에서 끝났다고 가정합니다.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use thiserror::Error;

use crate::db::{OrderRepository, PackageRepository};
use crate::settlement::{SettlementCoordinator, SettlementError, SettlementOutcome};

/// 결제 대행사가 보낸 결제 결과 (검증 완료)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub trade_no: String,
    /// 센트
    pub amount: i64,
    pub status: String,
}

impl PaymentConfirmation {
    /// 결제 성공 상태 여부 (대소문자 무시)
    pub fn is_paid(&self) -> bool {
        ["TRADE_SUCCESS", "TRADE_FINISHED"]
            .iter()
            .any(|paid| self.status.eq_ignore_ascii_case(paid))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Settled,
    AlreadyProcessed,
    InFlightElsewhere,
    MarkedFailed,
}

impl From<SettlementOutcome> for ConfirmationOutcome {
    fn from(outcome: SettlementOutcome) -> Self {
        match outcome {
            SettlementOutcome::Settled { .. } => ConfirmationOutcome::Settled,
            SettlementOutcome::AlreadyProcessed => ConfirmationOutcome::AlreadyProcessed,
            SettlementOutcome::InFlightElsewhere => ConfirmationOutcome::InFlightElsewhere,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfirmationError {
    #[error("주문을 찾을 수 없음: {0}")]
    OrderNotFound(String),

    #[error("결제 금액 불일치: 주문 {expected}, 통지 {actual}")]
    AmountMismatch { expected: i64, actual: i64 },

    #[error("패키지를 찾을 수 없음: {0}")]
    PackageNotFound(i64),

    #[error("정산 에러: {0}")]
    Settlement(#[from] SettlementError),

    #[error("데이터베이스 에러: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct ConfirmationService {
    orders: OrderRepository,
    packages: PackageRepository,
    coordinator: Arc<SettlementCoordinator>,
}

impl ConfirmationService {
    pub fn new(pool: SqlitePool, coordinator: Arc<SettlementCoordinator>) -> Self {
        Self {
            orders: OrderRepository::new(pool.clone()),
            packages: PackageRepository::new(pool),
            coordinator,
        }
    }

    pub async fn confirm(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmationOutcome, ConfirmationError> {
        let trade_no = confirmation.trade_no.as_str();
        let order = self
            .orders
            .find_by_trade_no(trade_no)
            .await?
            .ok_or_else(|| ConfirmationError::OrderNotFound(trade_no.to_string()))?;

        if order.amount != confirmation.amount {
            warn!(
                "결제 금액 불일치: trade_no={} order={} notified={}",
                trade_no, order.amount, confirmation.amount
            );
            return Err(ConfirmationError::AmountMismatch {
                expected: order.amount,
                actual: confirmation.amount,
            });
        }

        if order.order_status().map_or(true, |status| status.is_terminal()) {
            info!("이미 처리된 주문: trade_no={} status={}", trade_no, order.status);
            return Ok(ConfirmationOutcome::AlreadyProcessed);
        }

        if !confirmation.is_paid() {
            let changed = self.orders.mark_failed(trade_no).await?;
            info!("결제 실패 통지: trade_no={} status={}", trade_no, confirmation.status);
            return Ok(if changed {
                ConfirmationOutcome::MarkedFailed
            } else {
                ConfirmationOutcome::AlreadyProcessed
            });
        }

        let package = self
            .packages
            .find_by_id(order.package_id)
            .await?
            .ok_or(ConfirmationError::PackageNotFound(order.package_id))?;

        let outcome = self.coordinator.settle(trade_no, order.user_id, package.traffic).await?;
        Ok(outcome.into())
    }
}
