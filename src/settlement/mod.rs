//! 결제 정산 모듈

pub mod confirmation;
pub mod coordinator;

pub use confirmation::{
    ConfirmationError, ConfirmationOutcome, ConfirmationService, PaymentConfirmation,
};
pub use coordinator::{
    SettlementCoordinator, SettlementError, SettlementOutcome, SETTLEMENT_LOCK_TTL,
};
