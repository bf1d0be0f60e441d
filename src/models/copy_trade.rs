//! Copy-trading configuration and its mirrored positions.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

use super::OrderSide;

/// Sizing aggressiveness relative to the followed trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Parse a risk level, falling back to `Medium` (multiplier 1.0) for
    /// anything unrecognised.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    pub fn multiplier(&self) -> Decimal {
        match self {
            RiskLevel::Low => dec!(0.5),
            RiskLevel::Medium => dec!(1.0),
            RiskLevel::High => dec!(1.5),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStatus {
    Active,
    Paused,
}

/// Caller-supplied parameters for following a trader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyTradeSpec {
    pub follow_trader: String,

    /// "low", "medium" or "high"; anything else sizes like "medium"
    pub risk_level: String,

    pub max_positions: usize,

    /// Total notional this config may have open at once
    pub allocation: Decimal,

    #[serde(default)]
    pub stop_loss: bool,
}

/// Trade reported by the activity feed for a followed trader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderActivity {
    pub trader_id: String,
    pub side: OrderSide,
    pub token: String,
    pub size: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,

    /// Source trade identifier; derived from the other fields when empty
    #[serde(default)]
    pub trade_id: String,
}

impl TraderActivity {
    pub fn source_trade_id(&self) -> String {
        if self.trade_id.is_empty() {
            format!("{}-{}-{}", self.trader_id, self.token, self.timestamp.timestamp_millis())
        } else {
            self.trade_id.clone()
        }
    }
}

/// One open position mirrored from the followed trader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirroredPosition {
    pub id: String,
    pub token: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub entry_price: Decimal,

    /// Notional charged against the allocation budget
    pub cost: Decimal,

    pub source_trade_id: String,
    pub opened_at: DateTime<Utc>,

    /// Set while an exit for this position is in flight
    #[serde(default)]
    pub closing: bool,
}

impl MirroredPosition {
    /// Return relative to entry at `price`.
    pub fn return_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) / self.entry_price
    }

    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        match self.side {
            OrderSide::Buy => (price - self.entry_price) * self.size,
            OrderSide::Sell => (self.entry_price - price) * self.size,
        }
    }

    /// Whether `price` has fallen to the stop level `stop_loss_pct` below entry.
    pub fn stop_loss_hit(&self, price: Decimal, stop_loss_pct: Decimal) -> bool {
        self.return_pct(price) <= -stop_loss_pct
    }
}

/// A trader being mirrored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyTradeConfig {
    pub id: String,
    pub trader_id: String,
    pub risk_level: RiskLevel,
    pub max_positions: usize,
    pub allocation_budget: Decimal,
    pub used_allocation: Decimal,

    /// Notional held for entries whose execution is still in flight
    pub reserved_allocation: Decimal,
    pub reserved_slots: usize,

    pub enable_stop_loss: bool,
    pub positions: Vec<MirroredPosition>,
    pub status: CopyStatus,

    pub rejected_actions: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CopyTradeConfig {
    pub fn new(id: String, spec: CopyTradeSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            trader_id: spec.follow_trader,
            risk_level: RiskLevel::from_str_lossy(&spec.risk_level),
            max_positions: spec.max_positions,
            allocation_budget: spec.allocation,
            used_allocation: Decimal::ZERO,
            reserved_allocation: Decimal::ZERO,
            reserved_slots: 0,
            enable_stop_loss: spec.stop_loss,
            positions: Vec::new(),
            status: CopyStatus::Active,
            rejected_actions: 0,
            last_error: None,
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CopyStatus::Active
    }

    pub fn multiplier(&self) -> Decimal {
        self.risk_level.multiplier()
    }

    pub fn remaining_allocation(&self) -> Decimal {
        self.allocation_budget - self.used_allocation - self.reserved_allocation
    }

    /// Check that one more position costing `cost` fits the cap and budget,
    /// counting entries that are still in flight.
    pub fn check_capacity(&self, cost: Decimal) -> EngineResult<()> {
        let open = self.positions.len() + self.reserved_slots;
        if open >= self.max_positions {
            return Err(EngineError::allocation_rejected(
                &self.id,
                format!("position cap {} reached", self.max_positions),
            ));
        }
        let committed = self.used_allocation + self.reserved_allocation;
        if committed + cost > self.allocation_budget {
            return Err(EngineError::budget_exceeded(
                &self.id,
                committed,
                cost,
                self.allocation_budget,
            ));
        }
        Ok(())
    }

    /// Hold budget and a position slot for an entry about to execute.
    pub fn reserve(&mut self, cost: Decimal) -> EngineResult<()> {
        self.check_capacity(cost)?;
        self.reserved_allocation += cost;
        self.reserved_slots += 1;
        Ok(())
    }

    /// Give back a reservation whose execution failed.
    pub fn release_reservation(&mut self, cost: Decimal) {
        self.reserved_allocation = (self.reserved_allocation - cost).max(Decimal::ZERO);
        self.reserved_slots = self.reserved_slots.saturating_sub(1);
    }

    /// Turn a reservation into an open position.
    pub fn commit_reservation(&mut self, reserved_cost: Decimal, position: MirroredPosition) -> EngineResult<()> {
        self.release_reservation(reserved_cost);
        self.open_position(position)
    }

    /// Add a filled position, charging its cost to the budget.
    pub fn open_position(&mut self, position: MirroredPosition) -> EngineResult<()> {
        self.check_capacity(position.cost)?;
        self.used_allocation += position.cost;
        self.positions.push(position);
        self.last_error = None;
        Ok(())
    }

    /// Mark the given positions as closing, returning the ids that were not
    /// already being closed.
    pub fn mark_closing(&mut self, ids: &[String]) -> Vec<String> {
        let mut marked = Vec::new();
        for position in self.positions.iter_mut() {
            if !position.closing && ids.contains(&position.id) {
                position.closing = true;
                marked.push(position.id.clone());
            }
        }
        marked
    }

    pub fn unmark_closing(&mut self, ids: &[String]) {
        for position in self.positions.iter_mut() {
            if ids.contains(&position.id) {
                position.closing = false;
            }
        }
    }

    /// Remove the given positions and release their cost.
    pub fn close_positions(&mut self, ids: &[String]) -> Vec<MirroredPosition> {
        let (closed, kept): (Vec<_>, Vec<_>) = self
            .positions
            .drain(..)
            .partition(|p| ids.contains(&p.id));
        self.positions = kept;

        let released: Decimal = closed.iter().map(|p| p.cost).sum();
        self.used_allocation = (self.used_allocation - released).max(Decimal::ZERO);
        closed
    }

    /// Open positions in `token` that are not already being closed.
    pub fn positions_in(&self, token: &str) -> Vec<&MirroredPosition> {
        self.positions
            .iter()
            .filter(|p| p.token == token && !p.closing)
            .collect()
    }

    pub fn set_status(&mut self, status: CopyStatus) -> EngineResult<()> {
        if self.status == status {
            return Err(EngineError::invalid_transition(
                &self.id,
                format!("copy config already {:?}", status).to_lowercase(),
            ));
        }
        self.status = status;
        Ok(())
    }
}
