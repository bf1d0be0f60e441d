//! Copy-trade allocation: turns a followed trader's action into a mirrored
//! entry or exit, respecting risk multiplier, budget and position cap.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::debug;

use crate::error::EngineResult;
use crate::models::{CopyTradeConfig, OrderSide, TraderActivity};

/// Why mirrored positions are being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TraderExited,
    StopLoss,
}

/// A mirrored entry to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPlan {
    pub token: String,
    pub size: Decimal,
    pub price: Decimal,
    pub cost: Decimal,
    pub source_trade_id: String,
}

/// A set of mirrored positions in one token to close.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitPlan {
    pub token: String,
    pub position_ids: Vec<String>,
    pub size: Decimal,
    pub price: Decimal,
    pub reason: ExitReason,
}

/// What to do with one trader action.
#[derive(Debug, Clone, PartialEq)]
pub enum CopyDecision {
    Skip(String),
    Open(EntryPlan),
    Close(ExitPlan),
}

/// Stateless sizing and exit rules for copy-trading configs.
#[derive(Debug, Clone)]
pub struct CopyAllocator {
    stop_loss_pct: Decimal,
}

impl CopyAllocator {
    pub fn new(stop_loss_pct: Decimal) -> Self {
        Self { stop_loss_pct }
    }

    /// Decide how `config` responds to `activity`.
    ///
    /// Returns `AllocationRejected` when a buy would exceed the position cap
    /// or the allocation budget.
    pub fn plan(&self, config: &CopyTradeConfig, activity: &TraderActivity) -> EngineResult<CopyDecision> {
        if !config.is_active() {
            return Ok(CopyDecision::Skip("copy config paused".to_string()));
        }
        if activity.trader_id != config.trader_id {
            return Ok(CopyDecision::Skip(format!(
                "activity from {} does not match followed trader",
                activity.trader_id
            )));
        }

        match activity.side {
            OrderSide::Buy => {
                let size = activity.size * config.multiplier();
                let cost = size * activity.price;
                if size <= Decimal::ZERO {
                    return Ok(CopyDecision::Skip("mirrored size is zero".to_string()));
                }

                config.check_capacity(cost)?;

                debug!(
                    copy_id = %config.id,
                    token = %activity.token,
                    size = %size,
                    cost = %cost,
                    "Planned mirrored entry"
                );

                Ok(CopyDecision::Open(EntryPlan {
                    token: activity.token.clone(),
                    size,
                    price: activity.price,
                    cost,
                    source_trade_id: activity.source_trade_id(),
                }))
            }
            OrderSide::Sell => {
                let open = config.positions_in(&activity.token);
                if open.is_empty() {
                    return Ok(CopyDecision::Skip(format!(
                        "no mirrored position in {}",
                        activity.token
                    )));
                }

                Ok(CopyDecision::Close(ExitPlan {
                    token: activity.token.clone(),
                    position_ids: open.iter().map(|p| p.id.clone()).collect(),
                    size: open.iter().map(|p| p.size).sum(),
                    price: activity.price,
                    reason: ExitReason::TraderExited,
                }))
            }
        }
    }

    /// Positions whose price has fallen through the stop level, grouped by token.
    pub fn stop_loss_exits(
        &self,
        config: &CopyTradeConfig,
        prices: &HashMap<String, Decimal>,
    ) -> Vec<ExitPlan> {
        if !config.is_active() || !config.enable_stop_loss {
            return Vec::new();
        }

        let mut by_token: HashMap<&str, ExitPlan> = HashMap::new();
        for position in config.positions.iter().filter(|p| !p.closing) {
            let Some(price) = prices.get(&position.token).copied() else {
                continue;
            };
            if !position.stop_loss_hit(price, self.stop_loss_pct) {
                continue;
            }

            let plan = by_token.entry(&position.token).or_insert_with(|| ExitPlan {
                token: position.token.clone(),
                position_ids: Vec::new(),
                size: Decimal::ZERO,
                price,
                reason: ExitReason::StopLoss,
            });
            plan.position_ids.push(position.id.clone());
            plan.size += position.size;
        }

        by_token.into_values().collect()
    }
}
