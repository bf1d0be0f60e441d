//! Limit order trigger evaluation.
//!
//! Decides, for one order, a price and a point in time, which transition (if
//! any) the order should take. Evaluation is pure; executing the result is the
//! engine's job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{LimitOrder, OrderSide, OrderStatus};

/// Why a price-triggered execution fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    LimitReached,
    StopLoss,
    TakeProfit,
}

impl TriggerReason {
    /// Status the order takes once the execution succeeds.
    pub fn target_status(&self) -> OrderStatus {
        match self {
            TriggerReason::LimitReached => OrderStatus::Executed,
            TriggerReason::StopLoss => OrderStatus::Stopped,
            TriggerReason::TakeProfit => OrderStatus::ProfitTaken,
        }
    }
}

/// Outcome of evaluating one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTrigger {
    /// Past expiry; transitions without touching the gateway.
    Expire,
    /// Execute at `price`, then move to `reason.target_status()`.
    Fill { reason: TriggerReason, price: Decimal },
}

/// Evaluate a single order.
///
/// Rules are checked in priority order and the first match wins: expiry,
/// limit crossing, then the protective stop-loss and take-profit levels.
/// Protective levels are only consulted for buy orders; sell orders ignore
/// them even when set.
///
/// A missing `price` only suppresses the price rules. Expiry still applies.
pub fn evaluate(order: &LimitOrder, price: Option<Decimal>, now: DateTime<Utc>) -> Option<OrderTrigger> {
    if !order.is_active() {
        return None;
    }

    if order.is_expired_at(now) {
        return Some(OrderTrigger::Expire);
    }

    let price = price?;

    let limit_crossed = match order.side {
        OrderSide::Buy => price <= order.limit_price,
        OrderSide::Sell => price >= order.limit_price,
    };
    if limit_crossed {
        return Some(OrderTrigger::Fill {
            reason: TriggerReason::LimitReached,
            price,
        });
    }

    if order.side == OrderSide::Buy {
        if order.stop_loss_price.map_or(false, |stop| price <= stop) {
            return Some(OrderTrigger::Fill {
                reason: TriggerReason::StopLoss,
                price,
            });
        }
        if order.take_profit_price.map_or(false, |target| price >= target) {
            return Some(OrderTrigger::Fill {
                reason: TriggerReason::TakeProfit,
                price,
            });
        }
    }

    None
}

/// Evaluate every order against a price snapshot, returning those that must act.
pub fn evaluate_all(
    orders: &[LimitOrder],
    prices: &HashMap<String, Decimal>,
    now: DateTime<Utc>,
) -> Vec<(LimitOrder, OrderTrigger)> {
    orders
        .iter()
        .filter_map(|order| {
            let price = prices.get(&order.token_address).copied();
            evaluate(order, price, now).map(|trigger| (order.clone(), trigger))
        })
        .collect()
}
