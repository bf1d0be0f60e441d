//! Limit order model and its status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(EngineError::InvalidSpec(format!("unknown order side '{}'", other))),
        }
    }
}

/// Lifecycle state of a limit order. Everything except `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    Executed,
    Expired,
    Stopped,
    ProfitTaken,
    Canceled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::Executed => "executed",
            OrderStatus::Expired => "expired",
            OrderStatus::Stopped => "stopped",
            OrderStatus::ProfitTaken => "profit_taken",
            OrderStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied parameters for a new limit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrderSpec {
    pub side: OrderSide,

    /// Token symbol or mint address, matched against price snapshot keys
    pub token_address: String,

    pub limit_price: Decimal,
    pub quantity: Decimal,

    /// Relative expiry such as "24h" or "7d"
    #[serde(default)]
    pub expiry: Option<String>,

    #[serde(default)]
    pub stop_loss: Option<Decimal>,

    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

/// A standing limit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrder {
    pub id: String,
    pub side: OrderSide,
    pub token_address: String,
    pub limit_price: Decimal,
    pub quantity: Decimal,
    pub expiry_at: Option<DateTime<Utc>>,

    /// Protective exit below this price. Evaluated for buy orders only.
    pub stop_loss_price: Option<Decimal>,

    /// Protective exit above this price. Evaluated for buy orders only.
    pub take_profit_price: Option<Decimal>,

    pub status: OrderStatus,
    pub execution_price: Option<Decimal>,
    pub execution_time: Option<DateTime<Utc>>,

    /// Most recent failed execution attempt, cleared on success
    pub last_error: Option<String>,
    pub failed_attempts: u32,

    pub created_at: DateTime<Utc>,
}

impl LimitOrder {
    pub fn new(id: String, spec: LimitOrderSpec, expiry_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            side: spec.side,
            token_address: spec.token_address,
            limit_price: spec.limit_price,
            quantity: spec.quantity,
            expiry_at,
            stop_loss_price: spec.stop_loss,
            take_profit_price: spec.take_profit,
            status: OrderStatus::Active,
            execution_price: None,
            execution_time: None,
            last_error: None,
            failed_attempts: 0,
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == OrderStatus::Active
    }

    /// Whether the order is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_at.map_or(false, |expiry| expiry < now)
    }

    /// Move the order out of `Active`.
    ///
    /// Fails if the order is already terminal or if `to` is `Active`.
    pub fn transition(
        &mut self,
        to: OrderStatus,
        execution_price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        if self.status.is_terminal() {
            return Err(EngineError::invalid_transition(
                &self.id,
                format!("order already {}", self.status),
            ));
        }
        if !to.is_terminal() {
            return Err(EngineError::invalid_transition(&self.id, "cannot re-activate an order"));
        }

        self.status = to;
        self.execution_price = execution_price;
        self.execution_time = Some(at);
        self.last_error = None;
        Ok(())
    }

    /// Record a failed execution attempt; the order stays active.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failed_attempts += 1;
        self.last_error = Some(error.into());
    }
}
