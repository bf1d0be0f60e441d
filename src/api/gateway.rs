//! Execution gateway: the capability the engine calls to actually trade.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::OrderSide;

/// What kind of instruction an execution belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    LimitOrder,
    StopLoss,
    TakeProfit,
    Dca,
    CopyEntry,
    CopyExit,
}

/// Unit of `ExecutionParams::amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountUnit {
    /// Number of tokens
    Base,
    /// Quote-currency notional (DCA investments)
    Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionParams {
    pub side: OrderSide,
    pub token: String,
    pub amount: Decimal,
    pub unit: AmountUnit,

    /// Price that triggered the execution, if any
    pub reference_price: Option<Decimal>,

    pub slippage: Decimal,

    /// Address of the signing wallet
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub kind: ExecutionKind,
    pub entity_id: String,
    pub params: ExecutionParams,
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub execution_price: Option<Decimal>,
    pub error: Option<String>,
}

impl ExecutionReport {
    pub fn filled(price: Option<Decimal>) -> Self {
        Self {
            success: true,
            execution_price: price,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            execution_price: None,
            error: Some(error.into()),
        }
    }

    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "execution failed".to_string())
    }
}

/// Performs trades on behalf of the engine.
///
/// Implementations are not assumed to be idempotent; the engine guarantees at
/// most one outstanding call per instruction. Expected failures (no
/// liquidity, insufficient funds) are reported through `ExecutionReport`,
/// not panics.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionReport;

    fn name(&self) -> &'static str;
}

/// Dry-run gateway that fills every request at its reference price.
#[derive(Debug, Default, Clone)]
pub struct SimulatedGateway;

impl SimulatedGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionGateway for SimulatedGateway {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionReport {
        info!(
            kind = ?request.kind,
            entity = %request.entity_id,
            side = %request.params.side,
            token = %request.params.token,
            amount = %request.params.amount,
            price = ?request.params.reference_price,
            "[DRY RUN] Would execute trade"
        );
        ExecutionReport::filled(request.params.reference_price)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
