//! Instruction plan files.
//!
//! A plan is a JSON document listing the standing instructions to register
//! when the engine starts:
//!
//! ```json
//! {
//!   "limit_orders": [{ "side": "buy", "token_address": "SOLANA", "limit_price": "19.5", "quantity": "2", "expiry": "24h" }],
//!   "dca": [{ "asset": "BONK", "investment_amount": "25", "frequency": "daily", "duration": "7days" }],
//!   "copy_trading": [{ "follow_trader": "whale", "risk_level": "low", "max_positions": 3, "allocation": "500", "stop_loss": true }]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::Engine;
use crate::models::{CopyTradeSpec, DcaSpec, LimitOrderSpec};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructionPlan {
    #[serde(default)]
    pub limit_orders: Vec<LimitOrderSpec>,

    #[serde(default)]
    pub dca: Vec<DcaSpec>,

    #[serde(default)]
    pub copy_trading: Vec<CopyTradeSpec>,
}

/// Ids created by applying a plan.
#[derive(Debug, Clone, Default)]
pub struct AppliedPlan {
    pub orders: Vec<String>,
    pub strategies: Vec<String>,
    pub copies: Vec<String>,
}

impl InstructionPlan {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid plan file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse instruction plan")
    }

    pub fn is_empty(&self) -> bool {
        self.limit_orders.is_empty() && self.dca.is_empty() && self.copy_trading.is_empty()
    }

    /// Every token the plan needs quotes for.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .limit_orders
            .iter()
            .map(|o| o.token_address.clone())
            .chain(self.dca.iter().map(|d| d.asset.clone()))
            .collect();
        tokens.sort();
        tokens.dedup();
        tokens
    }

    /// Register every instruction, stopping at the first one the engine refuses.
    pub async fn apply(&self, engine: &Engine) -> Result<AppliedPlan> {
        let mut applied = AppliedPlan::default();

        for (i, spec) in self.limit_orders.iter().enumerate() {
            let id = engine
                .create_limit_order(spec.clone())
                .await
                .with_context(|| format!("limit_orders[{}] rejected", i))?;
            applied.orders.push(id);
        }

        for (i, spec) in self.dca.iter().enumerate() {
            let id = engine
                .create_dca_strategy(spec.clone())
                .await
                .with_context(|| format!("dca[{}] rejected", i))?;
            applied.strategies.push(id);
        }

        for (i, spec) in self.copy_trading.iter().enumerate() {
            let id = engine
                .create_copy_trade_config(spec.clone())
                .await
                .with_context(|| format!("copy_trading[{}] rejected", i))?;
            applied.copies.push(id);
        }

        info!(
            orders = applied.orders.len(),
            strategies = applied.strategies.len(),
            copies = applied.copies.len(),
            "Instruction plan applied"
        );
        Ok(applied)
    }
}
