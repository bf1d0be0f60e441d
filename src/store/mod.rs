//! In-memory instruction store.
//!
//! Holds every limit order, DCA strategy and copy-trading config, keyed by an
//! opaque identifier. All status changes go through here so that each one is
//! applied atomically against a single entity.

mod table;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    CopyStatus, CopyTradeConfig, CopyTradeSpec, DcaSpec, DcaStrategy, InstructionKind,
    InstructionSnapshot, LimitOrder, LimitOrderSpec, OrderStatus,
};
use crate::trading::scheduler;

pub use table::Table;

/// Registry of all standing instructions.
pub struct InstructionStore {
    orders: Table<LimitOrder>,
    strategies: Table<DcaStrategy>,
    copies: Table<CopyTradeConfig>,
}

impl InstructionStore {
    pub fn new() -> Self {
        Self {
            orders: Table::new(),
            strategies: Table::new(),
            copies: Table::new(),
        }
    }

    /// Fresh collision-resistant identifier for `kind`.
    pub fn next_id(kind: InstructionKind) -> String {
        format!("{}_{}", kind.id_prefix(), Uuid::new_v4().simple())
    }

    pub fn orders(&self) -> &Table<LimitOrder> {
        &self.orders
    }

    pub fn strategies(&self) -> &Table<DcaStrategy> {
        &self.strategies
    }

    pub fn copies(&self) -> &Table<CopyTradeConfig> {
        &self.copies
    }

    /// Validate and register a limit order.
    pub async fn create_limit_order(&self, spec: LimitOrderSpec, now: DateTime<Utc>) -> EngineResult<String> {
        require_positive("limit price", spec.limit_price)?;
        require_positive("quantity", spec.quantity)?;
        if let Some(stop) = spec.stop_loss {
            require_positive("stop loss", stop)?;
        }
        if let Some(target) = spec.take_profit {
            require_positive("take profit", target)?;
        }
        if spec.token_address.trim().is_empty() {
            return Err(EngineError::InvalidSpec("token address is empty".to_string()));
        }

        let expiry_at = spec
            .expiry
            .as_deref()
            .map(|e| scheduler::parse_expiry(e, now))
            .transpose()?;

        let id = Self::next_id(InstructionKind::LimitOrder);
        let order = LimitOrder::new(id.clone(), spec, expiry_at, now);

        info!(
            order_id = %id,
            side = %order.side,
            token = %order.token_address,
            limit = %order.limit_price,
            quantity = %order.quantity,
            "Limit order created"
        );

        self.orders.insert(id.clone(), order).await;
        Ok(id)
    }

    /// Validate a DCA spec, build its schedule and register it.
    pub async fn create_dca_strategy(&self, spec: DcaSpec, now: DateTime<Utc>) -> EngineResult<String> {
        require_positive("investment amount", spec.investment_amount)?;
        if spec.asset.trim().is_empty() {
            return Err(EngineError::InvalidSpec("asset is empty".to_string()));
        }

        let start = spec.start_date.unwrap_or(now);
        let intervals = scheduler::schedule(start, spec.frequency, &spec.duration)?;

        let id = Self::next_id(InstructionKind::Dca);
        let strategy = DcaStrategy::new(id.clone(), spec, start, intervals, now);

        info!(
            strategy_id = %id,
            asset = %strategy.asset,
            amount = %strategy.investment_amount,
            frequency = %strategy.frequency,
            intervals = strategy.intervals.len(),
            next = ?strategy.next_execution_time(),
            "DCA strategy created"
        );

        self.strategies.insert(id.clone(), strategy).await;
        Ok(id)
    }

    /// Validate and register a copy-trading config.
    pub async fn create_copy_trade(&self, spec: CopyTradeSpec, now: DateTime<Utc>) -> EngineResult<String> {
        if spec.allocation < Decimal::ZERO {
            return Err(EngineError::InvalidSpec("allocation must not be negative".to_string()));
        }
        if spec.follow_trader.trim().is_empty() {
            return Err(EngineError::InvalidSpec("trader id is empty".to_string()));
        }

        let id = Self::next_id(InstructionKind::CopyTrade);
        let config = CopyTradeConfig::new(id.clone(), spec, now);

        info!(
            copy_id = %id,
            trader = %config.trader_id,
            risk = %config.risk_level,
            budget = %config.allocation_budget,
            max_positions = config.max_positions,
            "Copy trading config created"
        );

        self.copies.insert(id.clone(), config).await;
        Ok(id)
    }

    /// Snapshot of any instruction by id.
    pub async fn get(&self, id: &str) -> Option<InstructionSnapshot> {
        if let Some(order) = self.orders.get(id).await {
            return Some(InstructionSnapshot::LimitOrder(order));
        }
        if let Some(strategy) = self.strategies.get(id).await {
            return Some(InstructionSnapshot::Dca(strategy));
        }
        self.copies.get(id).await.map(InstructionSnapshot::CopyTrade)
    }

    /// Snapshots of every instruction of `kind`.
    pub async fn list(&self, kind: InstructionKind) -> Vec<InstructionSnapshot> {
        match kind {
            InstructionKind::LimitOrder => self
                .orders
                .list()
                .await
                .into_iter()
                .map(InstructionSnapshot::LimitOrder)
                .collect(),
            InstructionKind::Dca => self
                .strategies
                .list()
                .await
                .into_iter()
                .map(InstructionSnapshot::Dca)
                .collect(),
            InstructionKind::CopyTrade => self
                .copies
                .list()
                .await
                .into_iter()
                .map(InstructionSnapshot::CopyTrade)
                .collect(),
        }
    }

    /// Move an idle limit order to a terminal status.
    pub async fn transition_order(
        &self,
        id: &str,
        to: OrderStatus,
        execution_price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.orders
            .update_idle(id, |order| order.transition(to, execution_price, at))
            .await
    }

    pub async fn set_copy_status(&self, id: &str, status: CopyStatus) -> EngineResult<()> {
        self.copies.update(id, |config| config.set_status(status)).await
    }
}

impl Default for InstructionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn require_positive(field: &str, value: Decimal) -> EngineResult<()> {
    if value <= Decimal::ZERO {
        return Err(EngineError::InvalidSpec(format!("{} must be positive, got {}", field, value)));
    }
    Ok(())
}
