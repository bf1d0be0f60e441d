//! Engine error kinds.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the instruction engine.
///
/// Precondition and validation failures are returned to whoever issued the
/// instruction. Failures inside a periodic pass are logged and recorded on
/// the entity instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Invalid transition for {id}: {reason}")]
    InvalidTransition { id: String, reason: String },

    #[error("Allocation rejected for {id}: {reason}")]
    AllocationRejected { id: String, reason: String },

    #[error("Gateway failure for {id}: {message}")]
    GatewayFailure { id: String, message: String },

    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    #[error("Instruction not found: {0}")]
    NotFound(String),

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Engine is not running")]
    NotRunning,
}

impl EngineError {
    pub fn invalid_transition(id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn allocation_rejected(id: &str, reason: impl Into<String>) -> Self {
        Self::AllocationRejected {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn budget_exceeded(id: &str, used: Decimal, cost: Decimal, budget: Decimal) -> Self {
        Self::allocation_rejected(
            id,
            format!("used {} + cost {} exceeds budget {}", used, cost, budget),
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
