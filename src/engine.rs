//! Engine: owns the instruction store and drives the periodic passes.
//!
//! Handles:
//! - Fast pass: limit-order triggers and copy-trade stop-losses
//! - Slow pass: DCA interval execution
//! - Routing followed traders' activity to their copy configs
//! - Start/stop and the global trading switch
//!
//! Every gateway call is bracketed by a claim on the entity (or a budget
//! reservation for copy entries), so overlapping or slow cycles never execute
//! the same trigger twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{
    AmountUnit, ExecutionGateway, ExecutionKind, ExecutionParams, ExecutionRequest, PriceOracle,
    PriceSnapshot, TraderFeed,
};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    CopyStatus, CopyTradeSpec, DcaSpec, DcaStrategy, InstructionKind, InstructionSnapshot,
    LimitOrder, LimitOrderSpec, MirroredPosition, OrderSide, OrderStatus, TraderActivity,
};
use crate::store::InstructionStore;
use crate::trading::scheduler;
use crate::trading::triggers::{self, OrderTrigger, TriggerReason};
use crate::trading::{CopyAllocator, CopyDecision, EngineConfig, EntryPlan, ExitPlan};
use crate::wallet::Wallet;

/// Result of one execution attempt inside a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Executed,
    Failed,
    Skipped,
    /// Gateway succeeded but the entity no longer accepted the result
    Stale,
}

/// Summary of one evaluation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub evaluated: usize,
    pub executed: usize,
    pub expired: usize,
    pub failed: usize,
    pub skipped: usize,
    pub copy_exits: usize,
}

impl CycleReport {
    fn record(&mut self, attempt: Attempt) {
        match attempt {
            Attempt::Executed => self.executed += 1,
            Attempt::Failed => self.failed += 1,
            Attempt::Skipped | Attempt::Stale => self.skipped += 1,
        }
    }
}

/// What a copy config did with one trader action or stop-loss.
#[derive(Debug, Clone, PartialEq)]
pub enum CopyOutcome {
    Opened {
        position_id: String,
        size: Decimal,
        cost: Decimal,
    },
    Closed {
        positions: usize,
        realized_pnl: Decimal,
    },
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Default)]
struct Counters {
    executions: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Orders,
    Dca,
}

/// The standing-instruction engine.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<InstructionStore>,
    gateway: Arc<dyn ExecutionGateway>,
    oracle: Arc<dyn PriceOracle>,
    feed: Option<Arc<dyn TraderFeed>>,
    allocator: CopyAllocator,

    wallet: Arc<RwLock<Option<Wallet>>>,
    trading_enabled: Arc<AtomicBool>,
    tickers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    subscriptions: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,

    counters: Arc<Counters>,
    last_check_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn ExecutionGateway>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        let allocator = CopyAllocator::new(config.copy_stop_loss_pct);
        Self {
            config,
            store: Arc::new(InstructionStore::new()),
            gateway,
            oracle,
            feed: None,
            allocator,
            wallet: Arc::new(RwLock::new(None)),
            trading_enabled: Arc::new(AtomicBool::new(false)),
            tickers: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            last_check_at: Arc::new(RwLock::new(None)),
        }
    }

    /// Attach the feed copy configs subscribe to.
    pub fn with_feed(mut self, feed: Arc<dyn TraderFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn store(&self) -> &InstructionStore {
        &self.store
    }

    // ==================== Wallet ====================

    pub async fn connect_wallet(&self, wallet: Wallet) -> Address {
        let address = wallet.address();
        *self.wallet.write().await = Some(wallet);
        info!(address = %address, "Wallet connected");
        address
    }

    async fn require_wallet(&self) -> EngineResult<String> {
        self.wallet
            .read()
            .await
            .as_ref()
            .map(|w| w.address().to_string())
            .ok_or(EngineError::WalletNotConnected)
    }

    // ==================== Control surface ====================

    pub async fn create_limit_order(&self, spec: LimitOrderSpec) -> EngineResult<String> {
        self.require_wallet().await?;
        self.store.create_limit_order(spec, Utc::now()).await
    }

    pub async fn create_dca_strategy(&self, spec: DcaSpec) -> EngineResult<String> {
        self.require_wallet().await?;
        self.store.create_dca_strategy(spec, Utc::now()).await
    }

    /// Register a copy config and subscribe it to the followed trader.
    pub async fn create_copy_trade_config(&self, spec: CopyTradeSpec) -> EngineResult<String> {
        self.require_wallet().await?;
        let trader_id = spec.follow_trader.clone();
        let id = self.store.create_copy_trade(spec, Utc::now()).await?;
        self.subscribe(&id, &trader_id).await;
        Ok(id)
    }

    /// Cancel an active order. Refused while an execution is in flight.
    pub async fn cancel_limit_order(&self, id: &str) -> EngineResult<()> {
        self.store
            .transition_order(id, OrderStatus::Canceled, None, Utc::now())
            .await?;
        info!(order_id = %id, "Limit order canceled");
        Ok(())
    }

    pub async fn pause_copy_trading(&self, id: &str) -> EngineResult<()> {
        self.store.set_copy_status(id, CopyStatus::Paused).await?;
        info!(copy_id = %id, "Copy trading paused");
        Ok(())
    }

    pub async fn resume_copy_trading(&self, id: &str) -> EngineResult<()> {
        self.store.set_copy_status(id, CopyStatus::Active).await?;
        info!(copy_id = %id, "Copy trading resumed");
        Ok(())
    }

    pub async fn status(&self, id: &str) -> EngineResult<InstructionSnapshot> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub async fn list(&self, kind: InstructionKind) -> Vec<InstructionSnapshot> {
        self.store.list(kind).await
    }

    // ==================== Lifecycle ====================

    pub fn is_running(&self) -> bool {
        self.trading_enabled.load(Ordering::SeqCst)
    }

    /// Flip the global switch without touching the tickers.
    ///
    /// Cycles already under way finish; new cycles check the switch first.
    pub fn set_trading_enabled(&self, enabled: bool) {
        self.trading_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Enable trading and spawn both periodic passes.
    pub async fn start(&self) -> EngineResult<()> {
        self.require_wallet().await?;
        if self.trading_enabled.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }

        let mut tickers = self.tickers.lock().await;
        // Tickers left idle by the switch are replaced
        for stale in tickers.drain(..) {
            stale.abort();
        }
        tickers.push(self.spawn_ticker(self.config.order_check_interval(), Pass::Orders));
        tickers.push(self.spawn_ticker(self.config.dca_check_interval(), Pass::Dca));

        info!(
            order_interval = self.config.order_check_interval_secs,
            dca_interval = self.config.dca_check_interval_secs,
            gateway = self.gateway.name(),
            "Engine started"
        );
        Ok(())
    }

    /// Disable trading and cancel future passes.
    ///
    /// Gateway calls already in flight run to completion and their results are
    /// still applied.
    pub async fn stop(&self) -> EngineResult<()> {
        if !self.trading_enabled.swap(false, Ordering::SeqCst) {
            return Err(EngineError::NotRunning);
        }

        for ticker in self.tickers.lock().await.drain(..) {
            ticker.abort();
        }

        info!("Engine stopped");
        Ok(())
    }

    /// Stop if running and drop all feed subscriptions.
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(()) => {}
            Err(EngineError::NotRunning) => debug!("Engine already stopped"),
            Err(e) => warn!(error = %e, "Stop during shutdown failed"),
        }
        for ticker in self.tickers.lock().await.drain(..) {
            ticker.abort();
        }
        for (_, handle) in self.subscriptions.lock().await.drain() {
            handle.abort();
        }
        info!("Engine shutdown complete");
    }

    /// Start and keep running until Ctrl+C, then shut down.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.start().await?;

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received");

        self.shutdown().await;
        Ok(())
    }

    fn spawn_ticker(&self, period: Duration, pass: Pass) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                // Switch off: idle until it flips back or stop() aborts us
                if !engine.is_running() {
                    continue;
                }

                // Each cycle runs on its own task so a slow gateway call never
                // delays the next tick.
                let cycle = engine.clone();
                tokio::spawn(async move {
                    match pass {
                        Pass::Orders => {
                            cycle.run_order_cycle().await;
                        }
                        Pass::Dca => {
                            cycle.run_dca_cycle().await;
                        }
                    }
                });
            }
        })
    }

    // ==================== Fast pass ====================

    /// One order-trigger cycle against a fresh price snapshot.
    ///
    /// Returns `None` when trading is disabled.
    pub async fn run_order_cycle(&self) -> Option<CycleReport> {
        if !self.is_running() {
            debug!("Trading disabled, skipping order cycle");
            return None;
        }

        // Without prices only expiry can fire this cycle
        let prices = match self.oracle.get_prices().await {
            Ok(prices) => prices,
            Err(e) => {
                warn!(error = %e, "Price snapshot unavailable");
                PriceSnapshot::new()
            }
        };

        let now = Utc::now();
        *self.last_check_at.write().await = Some(now);

        Some(self.evaluate_orders(&prices, now).await)
    }

    /// Evaluate every idle active order and copy stop-loss against `prices`.
    pub async fn evaluate_orders(&self, prices: &PriceSnapshot, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();

        let orders = self.store.orders().idle(|o| o.is_active()).await;
        report.evaluated = orders.len();

        let mut fills = Vec::new();
        for (order, trigger) in triggers::evaluate_all(&orders, prices, now) {
            match trigger {
                OrderTrigger::Expire => {
                    match self
                        .store
                        .transition_order(&order.id, OrderStatus::Expired, None, now)
                        .await
                    {
                        Ok(()) => {
                            info!(order_id = %order.id, expiry = ?order.expiry_at, "Limit order expired");
                            report.expired += 1;
                        }
                        Err(e) => {
                            debug!(order_id = %order.id, error = %e, "Order changed before expiry");
                            report.skipped += 1;
                        }
                    }
                }
                OrderTrigger::Fill { reason, price } => {
                    fills.push(self.fill_order(order, reason, price, now));
                }
            }
        }

        let mut exits = Vec::new();
        for config in self.store.copies().list().await {
            for plan in self.allocator.stop_loss_exits(&config, prices) {
                exits.push(self.close_copy_positions(config.id.clone(), plan));
            }
        }

        let (fill_results, exit_results) = tokio::join!(join_all(fills), join_all(exits));

        for attempt in fill_results {
            report.record(attempt);
        }
        report.copy_exits = exit_results
            .iter()
            .filter(|o| matches!(o, CopyOutcome::Closed { .. }))
            .count();

        debug!(?report, "Order cycle complete");
        report
    }

    async fn fill_order(
        &self,
        order: LimitOrder,
        reason: TriggerReason,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Attempt {
        let id = order.id.clone();

        let owner = match self.require_wallet().await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(order_id = %id, error = %e, "Cannot execute order");
                return Attempt::Skipped;
            }
        };

        let claimed = self
            .store
            .orders()
            .claim(&id, |o| {
                if o.is_active() {
                    Ok(())
                } else {
                    Err(EngineError::invalid_transition(&o.id, format!("order already {}", o.status)))
                }
            })
            .await;
        if let Err(e) = claimed {
            debug!(order_id = %id, error = %e, "Order not claimable");
            return Attempt::Skipped;
        }

        let (kind, side) = match reason {
            TriggerReason::LimitReached => (ExecutionKind::LimitOrder, order.side),
            TriggerReason::StopLoss => (ExecutionKind::StopLoss, OrderSide::Sell),
            TriggerReason::TakeProfit => (ExecutionKind::TakeProfit, OrderSide::Sell),
        };

        let request = self.request(
            kind,
            &id,
            side,
            &order.token_address,
            order.quantity,
            AmountUnit::Base,
            Some(price),
            owner,
        );
        let report = self.gateway.execute(request).await;

        let target = reason.target_status();
        let fill_price = report.execution_price.unwrap_or(price);
        let applied = self
            .store
            .orders()
            .complete(&id, |o| {
                if report.success {
                    o.transition(target, Some(fill_price), now)
                } else {
                    o.record_failure(report.error_message());
                    Ok(())
                }
            })
            .await;

        match (report.success, applied) {
            (true, Ok(())) => {
                self.counters.executions.fetch_add(1, Ordering::Relaxed);
                info!(
                    order_id = %id,
                    side = %order.side,
                    token = %order.token_address,
                    status = %target,
                    price = %fill_price,
                    "Limit order executed"
                );
                Attempt::Executed
            }
            (true, Err(e)) => {
                warn!(order_id = %id, error = %e, "Execution result not applied");
                Attempt::Stale
            }
            (false, _) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    order_id = %id,
                    error = %report.error_message(),
                    "Limit order execution failed, will retry"
                );
                Attempt::Failed
            }
        }
    }

    // ==================== Slow pass ====================

    /// One DCA cycle. Returns `None` when trading is disabled.
    pub async fn run_dca_cycle(&self) -> Option<CycleReport> {
        if !self.is_running() {
            debug!("Trading disabled, skipping DCA cycle");
            return None;
        }
        Some(self.execute_due_strategies(Utc::now()).await)
    }

    /// Fire the cursor interval of every strategy due at `now`.
    pub async fn execute_due_strategies(&self, now: DateTime<Utc>) -> CycleReport {
        let strategies = self.store.strategies().idle(|s| s.is_active()).await;
        let due = scheduler::due_strategies(&strategies, now);

        let mut report = CycleReport {
            evaluated: strategies.len(),
            ..Default::default()
        };

        let attempts = join_all(
            due.into_iter()
                .map(|(strategy, slot)| self.execute_dca_slot(strategy, slot)),
        )
        .await;
        for attempt in attempts {
            report.record(attempt);
        }

        debug!(?report, "DCA cycle complete");
        report
    }

    async fn execute_dca_slot(&self, strategy: DcaStrategy, slot: DateTime<Utc>) -> Attempt {
        let id = strategy.id.clone();

        let owner = match self.require_wallet().await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(strategy_id = %id, error = %e, "Cannot execute DCA");
                return Attempt::Skipped;
            }
        };

        let claimed = self
            .store
            .strategies()
            .claim(&id, |s| {
                if s.next_execution_time() == Some(slot) {
                    Ok(())
                } else {
                    Err(EngineError::invalid_transition(&s.id, "interval no longer pending"))
                }
            })
            .await;
        if let Err(e) = claimed {
            debug!(strategy_id = %id, error = %e, "Strategy not claimable");
            return Attempt::Skipped;
        }

        let request = self.request(
            ExecutionKind::Dca,
            &id,
            OrderSide::Buy,
            &strategy.asset,
            strategy.investment_amount,
            AmountUnit::Quote,
            None,
            owner,
        );
        let report = self.gateway.execute(request).await;

        let applied = self
            .store
            .strategies()
            .complete(&id, |s| {
                if report.success {
                    s.record_execution(slot)?;
                } else {
                    s.record_failure(report.error_message());
                }
                Ok((s.next_execution_time(), s.remaining_intervals()))
            })
            .await;

        match (report.success, applied) {
            (true, Ok((next, remaining))) => {
                self.counters.executions.fetch_add(1, Ordering::Relaxed);
                info!(
                    strategy_id = %id,
                    asset = %strategy.asset,
                    amount = %strategy.investment_amount,
                    interval = %slot,
                    next = ?next,
                    remaining = remaining,
                    "DCA interval executed"
                );
                Attempt::Executed
            }
            (true, Err(e)) => {
                warn!(strategy_id = %id, error = %e, "DCA result not applied");
                Attempt::Stale
            }
            (false, _) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    strategy_id = %id,
                    interval = %slot,
                    error = %report.error_message(),
                    "DCA execution failed, interval will be retried"
                );
                Attempt::Failed
            }
        }
    }

    // ==================== Copy trading ====================

    async fn subscribe(&self, copy_id: &str, trader_id: &str) {
        let Some(feed) = self.feed.as_ref() else {
            return;
        };

        let mut rx = feed.subscribe(trader_id, self.config.activity_buffer);
        let engine = self.clone();
        let id = copy_id.to_string();

        let handle = tokio::spawn(async move {
            while let Some(activity) = rx.recv().await {
                match engine.apply_trader_activity(&id, activity).await {
                    Ok(outcome) => debug!(copy_id = %id, ?outcome, "Trader activity handled"),
                    Err(e) => info!(copy_id = %id, error = %e, "Trader activity not mirrored"),
                }
            }
            debug!(copy_id = %id, "Activity subscription ended");
        });

        self.subscriptions
            .lock()
            .await
            .insert(copy_id.to_string(), handle);
        info!(copy_id = %copy_id, trader = %trader_id, "Started monitoring trader");
    }

    /// Mirror one followed-trader action into a copy config.
    ///
    /// Buys open a scaled position if the budget and position cap allow;
    /// sells close the mirrored positions in that token. Failed executions are
    /// dropped, not retried.
    pub async fn apply_trader_activity(
        &self,
        copy_id: &str,
        activity: TraderActivity,
    ) -> EngineResult<CopyOutcome> {
        if !self.is_running() {
            return Ok(CopyOutcome::Skipped("trading disabled".to_string()));
        }

        let config = self
            .store
            .copies()
            .get(copy_id)
            .await
            .ok_or_else(|| EngineError::NotFound(copy_id.to_string()))?;

        let decision = match self.allocator.plan(&config, &activity) {
            Ok(decision) => decision,
            Err(e) => {
                self.record_rejection(copy_id, &e).await;
                return Err(e);
            }
        };

        match decision {
            CopyDecision::Skip(reason) => {
                debug!(copy_id = %copy_id, reason = %reason, "Trader activity skipped");
                Ok(CopyOutcome::Skipped(reason))
            }
            CopyDecision::Open(plan) => self.open_copy_position(copy_id, plan).await,
            CopyDecision::Close(plan) => {
                match self.close_copy_positions(copy_id.to_string(), plan).await {
                    CopyOutcome::Failed(message) => Err(EngineError::GatewayFailure {
                        id: copy_id.to_string(),
                        message,
                    }),
                    outcome => Ok(outcome),
                }
            }
        }
    }

    async fn open_copy_position(&self, copy_id: &str, plan: EntryPlan) -> EngineResult<CopyOutcome> {
        let owner = self.require_wallet().await?;

        let reserved = self
            .store
            .copies()
            .update(copy_id, |c| {
                if !c.is_active() {
                    return Err(EngineError::invalid_transition(&c.id, "copy config paused"));
                }
                c.reserve(plan.cost)
            })
            .await;
        if let Err(e) = reserved {
            if matches!(e, EngineError::AllocationRejected { .. }) {
                self.record_rejection(copy_id, &e).await;
            }
            return Err(e);
        }

        let request = self.request(
            ExecutionKind::CopyEntry,
            copy_id,
            OrderSide::Buy,
            &plan.token,
            plan.size,
            AmountUnit::Base,
            Some(plan.price),
            owner,
        );
        let report = self.gateway.execute(request).await;

        if !report.success {
            let message = report.error_message();
            let _ = self
                .store
                .copies()
                .update(copy_id, |c| {
                    c.release_reservation(plan.cost);
                    c.last_error = Some(message.clone());
                    Ok(())
                })
                .await;
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            warn!(copy_id = %copy_id, token = %plan.token, error = %message, "Copy entry failed, dropping");
            return Err(EngineError::GatewayFailure {
                id: copy_id.to_string(),
                message,
            });
        }

        // The reserved notional is what counts against the budget
        let position = MirroredPosition {
            id: Uuid::new_v4().to_string(),
            token: plan.token.clone(),
            side: OrderSide::Buy,
            size: plan.size,
            entry_price: report.execution_price.unwrap_or(plan.price),
            cost: plan.cost,
            source_trade_id: plan.source_trade_id.clone(),
            opened_at: Utc::now(),
            closing: false,
        };
        let position_id = position.id.clone();

        let committed = self
            .store
            .copies()
            .update(copy_id, |c| c.commit_reservation(plan.cost, position))
            .await;
        if let Err(e) = committed {
            let _ = self
                .store
                .copies()
                .update(copy_id, |c| {
                    c.release_reservation(plan.cost);
                    Ok(())
                })
                .await;
            warn!(copy_id = %copy_id, token = %plan.token, error = %e, "Filled copy entry not recorded");
            return Err(e);
        }

        self.oracle.watch(&plan.token).await;
        self.counters.executions.fetch_add(1, Ordering::Relaxed);
        info!(
            copy_id = %copy_id,
            token = %plan.token,
            size = %plan.size,
            cost = %plan.cost,
            "Mirrored position opened"
        );

        Ok(CopyOutcome::Opened {
            position_id,
            size: plan.size,
            cost: plan.cost,
        })
    }

    async fn close_copy_positions(&self, copy_id: String, plan: ExitPlan) -> CopyOutcome {
        let owner = match self.require_wallet().await {
            Ok(owner) => owner,
            Err(e) => return CopyOutcome::Skipped(e.to_string()),
        };

        let marked = self
            .store
            .copies()
            .update(&copy_id, |c| {
                let ids = c.mark_closing(&plan.position_ids);
                let size: Decimal = c
                    .positions
                    .iter()
                    .filter(|p| ids.contains(&p.id))
                    .map(|p| p.size)
                    .sum();
                Ok((ids, size))
            })
            .await;

        let (ids, size) = match marked {
            Ok((ids, _)) if ids.is_empty() => {
                return CopyOutcome::Skipped("positions already closing".to_string());
            }
            Ok(marked) => marked,
            Err(e) => return CopyOutcome::Skipped(e.to_string()),
        };

        let request = self.request(
            ExecutionKind::CopyExit,
            &copy_id,
            OrderSide::Sell,
            &plan.token,
            size,
            AmountUnit::Base,
            Some(plan.price),
            owner,
        );
        let report = self.gateway.execute(request).await;

        if !report.success {
            let message = report.error_message();
            let _ = self
                .store
                .copies()
                .update(&copy_id, |c| {
                    c.unmark_closing(&ids);
                    c.last_error = Some(message.clone());
                    Ok(())
                })
                .await;
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            warn!(copy_id = %copy_id, token = %plan.token, reason = ?plan.reason, error = %message, "Copy exit failed");
            return CopyOutcome::Failed(message);
        }

        let exit_price = report.execution_price.unwrap_or(plan.price);
        let closed = self
            .store
            .copies()
            .update(&copy_id, |c| Ok(c.close_positions(&ids)))
            .await
            .unwrap_or_default();
        let realized_pnl: Decimal = closed.iter().map(|p| p.pnl_at(exit_price)).sum();

        self.counters.executions.fetch_add(1, Ordering::Relaxed);
        info!(
            copy_id = %copy_id,
            token = %plan.token,
            reason = ?plan.reason,
            positions = closed.len(),
            pnl = %realized_pnl,
            "Mirrored positions closed"
        );

        CopyOutcome::Closed {
            positions: closed.len(),
            realized_pnl,
        }
    }

    async fn record_rejection(&self, copy_id: &str, error: &EngineError) {
        self.counters.rejections.fetch_add(1, Ordering::Relaxed);
        let message = error.to_string();
        let _ = self
            .store
            .copies()
            .update(copy_id, |c| {
                c.rejected_actions += 1;
                c.last_error = Some(message.clone());
                Ok(())
            })
            .await;
        info!(copy_id = %copy_id, reason = %message, "Copy action rejected");
    }

    #[allow(clippy::too_many_arguments)]
    fn request(
        &self,
        kind: ExecutionKind,
        entity_id: &str,
        side: OrderSide,
        token: &str,
        amount: Decimal,
        unit: AmountUnit,
        reference_price: Option<Decimal>,
        owner: String,
    ) -> ExecutionRequest {
        ExecutionRequest {
            kind,
            entity_id: entity_id.to_string(),
            params: ExecutionParams {
                side,
                token: token.to_string(),
                amount,
                unit,
                reference_price,
                slippage: self.config.default_slippage,
                owner,
            },
        }
    }

    // ==================== Stats ====================

    pub async fn get_stats(&self) -> EngineStats {
        let orders = self.store.orders().list().await;
        let strategies = self.store.strategies().list().await;
        let copies = self.store.copies().list().await;

        EngineStats {
            is_running: self.is_running(),
            wallet: self.require_wallet().await.ok(),
            gateway: self.gateway.name(),
            active_orders: orders.iter().filter(|o| o.is_active()).count(),
            closed_orders: orders.iter().filter(|o| !o.is_active()).count(),
            active_strategies: strategies.iter().filter(|s| s.is_active()).count(),
            completed_strategies: strategies.iter().filter(|s| !s.is_active()).count(),
            copy_configs: copies.len(),
            open_positions: copies.iter().map(|c| c.positions.len()).sum(),
            used_allocation: copies.iter().map(|c| c.used_allocation).sum(),
            executions: self.counters.executions.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
            last_check_at: *self.last_check_at.read().await,
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub is_running: bool,
    pub wallet: Option<String>,
    pub gateway: &'static str,
    pub active_orders: usize,
    pub closed_orders: usize,
    pub active_strategies: usize,
    pub completed_strategies: usize,
    pub copy_configs: usize,
    pub open_positions: usize,
    pub used_allocation: Decimal,
    pub executions: u64,
    pub failures: u64,
    pub rejections: u64,
    pub last_check_at: Option<DateTime<Utc>>,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Engine Statistics ===")?;
        writeln!(f, "Status:           {}", if self.is_running { "Running" } else { "Stopped" })?;
        writeln!(f, "Wallet:           {}", self.wallet.as_deref().unwrap_or("not connected"))?;
        writeln!(f, "Gateway:          {}", self.gateway)?;
        writeln!(f, "Limit Orders:     {} active, {} closed", self.active_orders, self.closed_orders)?;
        writeln!(f, "DCA Strategies:   {} active, {} completed", self.active_strategies, self.completed_strategies)?;
        writeln!(f, "Copy Configs:     {} ({} open positions)", self.copy_configs, self.open_positions)?;
        writeln!(f, "Used Allocation:  ${:.2}", self.used_allocation)?;
        writeln!(f, "Executions:       {} (Failed: {}, Rejected: {})",
            self.executions, self.failures, self.rejections)?;
        writeln!(f, "Last Check:       {}", self.last_check_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "Never".to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{BroadcastFeed, ExecutionReport, StaticPriceOracle};
    use crate::models::{DcaStatus, Frequency};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use tokio_test::{assert_err, assert_ok};

    /// Gateway that records requests and can be told to fail or stall.
    #[derive(Default)]
    struct ScriptedGateway {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay_ms: u64,
        requests: std::sync::Mutex<Vec<ExecutionRequest>>,
    }

    impl ScriptedGateway {
        fn slow(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ExecutionGateway for ScriptedGateway {
        async fn execute(&self, request: ExecutionRequest) -> ExecutionReport {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                ExecutionReport::failed("insufficient funds")
            } else {
                ExecutionReport::filled(request.params.reference_price)
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    async fn make_engine(gateway: Arc<ScriptedGateway>) -> (Engine, Arc<StaticPriceOracle>) {
        let oracle = Arc::new(StaticPriceOracle::new(PriceSnapshot::new()));
        let engine = Engine::new(EngineConfig::default(), gateway, oracle.clone());
        let wallet = Wallet::from_private_key(&Wallet::generate().private_key).unwrap();
        engine.connect_wallet(wallet).await;
        engine.set_trading_enabled(true);
        (engine, oracle)
    }

    fn buy_order(limit: Decimal) -> LimitOrderSpec {
        LimitOrderSpec {
            side: OrderSide::Buy,
            token_address: "SOLANA".to_string(),
            limit_price: limit,
            quantity: dec!(3),
            expiry: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    fn prices(token: &str, price: Decimal) -> PriceSnapshot {
        HashMap::from([(token.to_string(), price)])
    }

    fn copy_spec(budget: Decimal) -> CopyTradeSpec {
        CopyTradeSpec {
            follow_trader: "whale".to_string(),
            risk_level: "medium".to_string(),
            max_positions: 5,
            allocation: budget,
            stop_loss: true,
        }
    }

    fn trader_action(side: OrderSide, size: Decimal, price: Decimal) -> TraderActivity {
        TraderActivity {
            trader_id: "whale".to_string(),
            side,
            token: "BONK".to_string(),
            size,
            price,
            timestamp: Utc::now(),
            trade_id: String::new(),
        }
    }

    async fn order(engine: &Engine, id: &str) -> LimitOrder {
        engine.store().orders().get(id).await.unwrap()
    }

    #[tokio::test]
    async fn test_buy_limit_executes_at_market_price() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_limit_order(buy_order(dec!(20.00))).await.unwrap();

        let report = engine.evaluate_orders(&prices("SOLANA", dec!(19.00)), Utc::now()).await;

        assert_eq!(report.executed, 1);
        let order = order(&engine, &id).await;
        assert_eq!(order.status, OrderStatus::Executed);
        assert_eq!(order.execution_price, Some(dec!(19.00)));
        assert!(order.execution_time.is_some());

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[0].kind, ExecutionKind::LimitOrder);
        assert_eq!(requests[0].params.amount, dec!(3));
        assert_eq!(requests[0].params.slippage, dec!(0.005));
    }

    #[tokio::test]
    async fn test_missing_price_leaves_order_active() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_limit_order(buy_order(dec!(20.00))).await.unwrap();

        let report = engine.evaluate_orders(&prices("BONK", dec!(0.00002)), Utc::now()).await;

        assert_eq!(report.evaluated, 1);
        assert_eq!(report.executed, 0);
        assert_eq!(order(&engine, &id).await.status, OrderStatus::Active);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_terminal_state_survives_repeated_cycles() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_limit_order(buy_order(dec!(20.00))).await.unwrap();

        engine.evaluate_orders(&prices("SOLANA", dec!(19.00)), Utc::now()).await;
        for price in [dec!(5), dec!(19), dec!(50)] {
            let report = engine.evaluate_orders(&prices("SOLANA", price), Utc::now()).await;
            assert_eq!(report.evaluated, 0);
        }

        let order = order(&engine, &id).await;
        assert_eq!(order.status, OrderStatus::Executed);
        assert_eq!(order.execution_price, Some(dec!(19.00)));
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_order_never_executes() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let mut spec = buy_order(dec!(20.00));
        spec.expiry = Some("1h".to_string());
        let id = engine.create_limit_order(spec).await.unwrap();

        let later = Utc::now() + ChronoDuration::hours(2);
        let report = engine.evaluate_orders(&prices("SOLANA", dec!(1.00)), later).await;

        assert_eq!(report.expired, 1);
        assert_eq!(report.executed, 0);
        let order = order(&engine, &id).await;
        assert_eq!(order.status, OrderStatus::Expired);
        assert_eq!(order.execution_price, None);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_gateway_failure_retries_next_cycle() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_limit_order(buy_order(dec!(20.00))).await.unwrap();

        gateway.set_failing(true);
        let report = engine.evaluate_orders(&prices("SOLANA", dec!(19.50)), Utc::now()).await;
        assert_eq!(report.failed, 1);

        let failed = order(&engine, &id).await;
        assert_eq!(failed.status, OrderStatus::Active);
        assert_eq!(failed.failed_attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("insufficient funds"));
        assert!(!engine.store().orders().is_in_flight(&id).await);

        gateway.set_failing(false);
        engine.evaluate_orders(&prices("SOLANA", dec!(19.50)), Utc::now()).await;
        let filled = order(&engine, &id).await;
        assert_eq!(filled.status, OrderStatus::Executed);
        assert_eq!(filled.last_error, None);
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_cycles_execute_once() {
        let gateway = Arc::new(ScriptedGateway::slow(200));
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_limit_order(buy_order(dec!(20.00))).await.unwrap();

        let slow_cycle = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.evaluate_orders(&prices("SOLANA", dec!(19.00)), Utc::now()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.store().orders().is_in_flight(&id).await);

        // The claimed order is invisible to the overlapping cycle
        let overlapping = engine.evaluate_orders(&prices("SOLANA", dec!(18.00)), Utc::now()).await;
        assert_eq!(overlapping.evaluated, 0);

        // Cancel is refused while the execution is outstanding
        assert_err!(engine.cancel_limit_order(&id).await);

        let first = slow_cycle.await.unwrap();
        assert_eq!(first.executed, 1);
        assert_eq!(gateway.calls(), 1);
        assert_eq!(order(&engine, &id).await.execution_price, Some(dec!(19.00)));
    }

    #[tokio::test]
    async fn test_buy_stop_loss_and_take_profit() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;

        let mut stop = buy_order(dec!(10.00));
        stop.stop_loss = Some(dec!(12.00));
        let stop_id = engine.create_limit_order(stop).await.unwrap();

        let mut target = buy_order(dec!(10.00));
        target.token_address = "TAKI".to_string();
        target.take_profit = Some(dec!(15.00));
        let target_id = engine.create_limit_order(target).await.unwrap();

        let snapshot = HashMap::from([
            ("SOLANA".to_string(), dec!(11.00)),
            ("TAKI".to_string(), dec!(16.00)),
        ]);
        let report = engine.evaluate_orders(&snapshot, Utc::now()).await;

        assert_eq!(report.executed, 2);
        assert_eq!(order(&engine, &stop_id).await.status, OrderStatus::Stopped);
        assert_eq!(order(&engine, &target_id).await.status, OrderStatus::ProfitTaken);

        let requests = gateway.requests.lock().unwrap();
        assert!(requests.iter().all(|r| r.params.side == OrderSide::Sell));
    }

    #[tokio::test]
    async fn test_sell_order_ignores_protective_levels() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;

        let mut spec = buy_order(dec!(30.00));
        spec.side = OrderSide::Sell;
        spec.stop_loss = Some(dec!(10.00));
        spec.take_profit = Some(dec!(25.00));
        let id = engine.create_limit_order(spec).await.unwrap();

        for price in [dec!(5.00), dec!(27.00)] {
            engine.evaluate_orders(&prices("SOLANA", price), Utc::now()).await;
            assert_eq!(order(&engine, &id).await.status, OrderStatus::Active);
        }
        assert_eq!(gateway.calls(), 0);

        engine.evaluate_orders(&prices("SOLANA", dec!(31.00)), Utc::now()).await;
        assert_eq!(order(&engine, &id).await.status, OrderStatus::Executed);
    }

    #[tokio::test]
    async fn test_cancel_is_final() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_limit_order(buy_order(dec!(20.00))).await.unwrap();

        assert_ok!(engine.cancel_limit_order(&id).await);
        assert_err!(engine.cancel_limit_order(&id).await);

        engine.evaluate_orders(&prices("SOLANA", dec!(1.00)), Utc::now()).await;
        assert_eq!(order(&engine, &id).await.status, OrderStatus::Canceled);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_dca_fires_each_interval_once() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let start = Utc::now();
        let id = engine
            .create_dca_strategy(DcaSpec {
                asset: "SOLANA".to_string(),
                investment_amount: dec!(25),
                frequency: Frequency::Daily,
                duration: "2days".to_string(),
                start_date: Some(start),
            })
            .await
            .unwrap();

        assert_eq!(engine.execute_due_strategies(start).await.executed, 1);
        // Same slot is not fired twice
        assert_eq!(engine.execute_due_strategies(start).await.executed, 0);

        let day = ChronoDuration::days(1);
        assert_eq!(engine.execute_due_strategies(start + day).await.executed, 1);
        assert_eq!(engine.execute_due_strategies(start + day * 2).await.executed, 1);
        assert_eq!(engine.execute_due_strategies(start + day * 5).await.executed, 0);

        let strategy = engine.store().strategies().get(&id).await.unwrap();
        assert_eq!(strategy.status, DcaStatus::Completed);
        assert_eq!(strategy.executed_intervals, strategy.intervals);
        assert_eq!(gateway.calls(), 3);

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[0].params.unit, AmountUnit::Quote);
        assert_eq!(requests[0].params.amount, dec!(25));
    }

    #[tokio::test]
    async fn test_overlapping_dca_cycles_execute_once() {
        let gateway = Arc::new(ScriptedGateway::slow(200));
        let (engine, _) = make_engine(gateway.clone()).await;
        let start = Utc::now();
        let id = engine
            .create_dca_strategy(DcaSpec {
                asset: "SOLANA".to_string(),
                investment_amount: dec!(25),
                frequency: Frequency::Daily,
                duration: "2days".to_string(),
                start_date: Some(start),
            })
            .await
            .unwrap();

        let slow_cycle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute_due_strategies(start).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let overlapping = engine.execute_due_strategies(start).await;
        assert_eq!(overlapping.executed, 0);

        assert_eq!(slow_cycle.await.unwrap().executed, 1);
        assert_eq!(gateway.calls(), 1);

        let strategy = engine.store().strategies().get(&id).await.unwrap();
        assert_eq!(strategy.cursor, 1);
        assert_eq!(strategy.executed_intervals, vec![start]);
    }

    #[tokio::test]
    async fn test_dca_failure_keeps_cursor() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let start = Utc::now();
        let id = engine
            .create_dca_strategy(DcaSpec {
                asset: "BONK".to_string(),
                investment_amount: dec!(10),
                frequency: Frequency::Weekly,
                duration: "1week".to_string(),
                start_date: Some(start),
            })
            .await
            .unwrap();

        gateway.set_failing(true);
        assert_eq!(engine.execute_due_strategies(start).await.failed, 1);
        let strategy = engine.store().strategies().get(&id).await.unwrap();
        assert_eq!(strategy.cursor, 0);
        assert_eq!(strategy.next_execution_time(), Some(start));
        assert!(strategy.executed_intervals.is_empty());

        gateway.set_failing(false);
        assert_eq!(engine.execute_due_strategies(start).await.executed, 1);
        let strategy = engine.store().strategies().get(&id).await.unwrap();
        assert_eq!(strategy.executed_intervals, vec![start]);
    }

    #[tokio::test]
    async fn test_copy_allocation_budget() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_copy_trade_config(copy_spec(dec!(100))).await.unwrap();

        let err = engine
            .apply_trader_activity(&id, trader_action(OrderSide::Buy, dec!(50), dec!(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AllocationRejected { .. }));
        assert_eq!(gateway.calls(), 0);

        let outcome = engine
            .apply_trader_activity(&id, trader_action(OrderSide::Buy, dec!(10), dec!(3)))
            .await
            .unwrap();
        assert!(matches!(outcome, CopyOutcome::Opened { .. }));

        let config = engine.store().copies().get(&id).await.unwrap();
        assert_eq!(config.used_allocation, dec!(30));
        assert_eq!(config.positions.len(), 1);
        assert_eq!(config.rejected_actions, 1);
    }

    #[tokio::test]
    async fn test_copy_entry_failure_is_dropped() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_copy_trade_config(copy_spec(dec!(100))).await.unwrap();

        gateway.set_failing(true);
        let err = engine
            .apply_trader_activity(&id, trader_action(OrderSide::Buy, dec!(10), dec!(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::GatewayFailure { .. }));

        let config = engine.store().copies().get(&id).await.unwrap();
        assert_eq!(config.used_allocation, Decimal::ZERO);
        assert_eq!(config.reserved_allocation, Decimal::ZERO);
        assert_eq!(config.reserved_slots, 0);
        assert!(config.positions.is_empty());
    }

    #[tokio::test]
    async fn test_trader_exit_closes_mirror() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_copy_trade_config(copy_spec(dec!(100))).await.unwrap();

        engine
            .apply_trader_activity(&id, trader_action(OrderSide::Buy, dec!(10), dec!(3)))
            .await
            .unwrap();
        let outcome = engine
            .apply_trader_activity(&id, trader_action(OrderSide::Sell, dec!(10), dec!(4)))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CopyOutcome::Closed {
                positions: 1,
                realized_pnl: dec!(10)
            }
        );
        let config = engine.store().copies().get(&id).await.unwrap();
        assert!(config.positions.is_empty());
        assert_eq!(config.used_allocation, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_copy_stop_loss_runs_in_order_cycle() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_copy_trade_config(copy_spec(dec!(100))).await.unwrap();
        engine
            .apply_trader_activity(&id, trader_action(OrderSide::Buy, dec!(10), dec!(3)))
            .await
            .unwrap();

        let report = engine.evaluate_orders(&prices("BONK", dec!(2.90)), Utc::now()).await;
        assert_eq!(report.copy_exits, 0);

        let report = engine.evaluate_orders(&prices("BONK", dec!(2.50)), Utc::now()).await;
        assert_eq!(report.copy_exits, 1);
        assert!(engine.store().copies().get(&id).await.unwrap().positions.is_empty());
    }

    #[tokio::test]
    async fn test_paused_config_ignores_activity() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let id = engine.create_copy_trade_config(copy_spec(dec!(100))).await.unwrap();

        engine.pause_copy_trading(&id).await.unwrap();
        let outcome = engine
            .apply_trader_activity(&id, trader_action(OrderSide::Buy, dec!(1), dec!(1)))
            .await
            .unwrap();
        assert!(matches!(outcome, CopyOutcome::Skipped(_)));

        engine.resume_copy_trading(&id).await.unwrap();
        let outcome = engine
            .apply_trader_activity(&id, trader_action(OrderSide::Buy, dec!(1), dec!(1)))
            .await
            .unwrap();
        assert!(matches!(outcome, CopyOutcome::Opened { .. }));
    }

    #[tokio::test]
    async fn test_feed_activity_reaches_config() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway.clone()).await;
        let feed = Arc::new(BroadcastFeed::new(16));
        let engine = engine.with_feed(feed.clone());
        let id = engine.create_copy_trade_config(copy_spec(dec!(100))).await.unwrap();

        feed.publish(trader_action(OrderSide::Buy, dec!(5), dec!(2)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let config = engine.store().copies().get(&id).await.unwrap();
        assert_eq!(config.positions.len(), 1);
        assert_eq!(config.used_allocation, dec!(10));
        engine.shutdown().await;
    }

    /// Oracle that remembers which tokens it was asked to quote.
    #[derive(Default)]
    struct RecordingOracle {
        watched: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PriceOracle for RecordingOracle {
        async fn get_prices(&self) -> anyhow::Result<PriceSnapshot> {
            Ok(PriceSnapshot::new())
        }

        async fn watch(&self, token: &str) {
            self.watched.lock().unwrap().push(token.to_string());
        }
    }

    #[tokio::test]
    async fn test_copy_entry_token_is_quoted() {
        let gateway = Arc::new(ScriptedGateway::default());
        let oracle = Arc::new(RecordingOracle::default());
        let engine = Engine::new(EngineConfig::default(), gateway.clone(), oracle.clone());
        let wallet = Wallet::from_private_key(&Wallet::generate().private_key).unwrap();
        engine.connect_wallet(wallet).await;
        engine.set_trading_enabled(true);
        let id = engine.create_copy_trade_config(copy_spec(dec!(100))).await.unwrap();

        // A refused entry does not add a quote
        gateway.set_failing(true);
        assert_err!(
            engine
                .apply_trader_activity(&id, trader_action(OrderSide::Buy, dec!(10), dec!(3)))
                .await
        );
        assert!(oracle.watched.lock().unwrap().is_empty());

        gateway.set_failing(false);
        assert_ok!(
            engine
                .apply_trader_activity(&id, trader_action(OrderSide::Buy, dec!(10), dec!(3)))
                .await
        );
        assert_eq!(*oracle.watched.lock().unwrap(), vec!["BONK".to_string()]);
    }

    #[tokio::test]
    async fn test_wallet_is_required() {
        let gateway = Arc::new(ScriptedGateway::default());
        let oracle = Arc::new(StaticPriceOracle::with_sample_prices());
        let engine = Engine::new(EngineConfig::default(), gateway, oracle);

        let err = engine.create_limit_order(buy_order(dec!(20))).await.unwrap_err();
        assert_eq!(err, EngineError::WalletNotConnected);
        assert_eq!(engine.start().await.unwrap_err(), EngineError::WalletNotConnected);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway).await;
        engine.set_trading_enabled(false);

        assert_eq!(engine.run_order_cycle().await, None);
        assert_eq!(engine.run_dca_cycle().await, None);

        assert_ok!(engine.start().await);
        assert_eq!(engine.start().await.unwrap_err(), EngineError::AlreadyRunning);
        assert!(engine.run_order_cycle().await.is_some());
        assert!(engine.get_stats().await.last_check_at.is_some());

        assert_ok!(engine.stop().await);
        assert_eq!(engine.stop().await.unwrap_err(), EngineError::NotRunning);
        assert_eq!(engine.run_order_cycle().await, None);
    }

    #[tokio::test]
    async fn test_switch_toggle_resumes_passes() {
        let gateway = Arc::new(ScriptedGateway::default());
        let oracle = Arc::new(StaticPriceOracle::new(PriceSnapshot::new()));
        let config = EngineConfig {
            order_check_interval_secs: 1,
            ..Default::default()
        };
        let engine = Engine::new(config, gateway.clone(), oracle.clone());
        let wallet = Wallet::from_private_key(&Wallet::generate().private_key).unwrap();
        engine.connect_wallet(wallet).await;
        assert_ok!(engine.start().await);

        engine.set_trading_enabled(false);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        engine.set_trading_enabled(true);

        let id = engine.create_limit_order(buy_order(dec!(20.00))).await.unwrap();
        oracle.set_price("SOLANA", dec!(19.00)).await;
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(order(&engine, &id).await.status, OrderStatus::Executed);
        assert_eq!(gateway.calls(), 1);
        assert_ok!(engine.stop().await);
    }

    #[tokio::test]
    async fn test_restart_after_switch_off_replaces_tickers() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway).await;
        engine.set_trading_enabled(false);

        assert_ok!(engine.start().await);
        engine.set_trading_enabled(false);
        assert_ok!(engine.start().await);
        assert_eq!(engine.tickers.lock().await.len(), 2);

        // Switched off: stop() reports NotRunning, shutdown still clears the tickers
        engine.set_trading_enabled(false);
        engine.shutdown().await;
        assert!(engine.tickers.lock().await.is_empty());
        assert!(!engine.is_running());

        engine.shutdown().await;
        assert_eq!(engine.stop().await.unwrap_err(), EngineError::NotRunning);
    }

    #[tokio::test]
    async fn test_run_order_cycle_uses_oracle() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, oracle) = make_engine(gateway.clone()).await;
        let id = engine.create_limit_order(buy_order(dec!(20.00))).await.unwrap();

        assert_eq!(engine.run_order_cycle().await.unwrap().executed, 0);

        oracle.set_price("SOLANA", dec!(19.00)).await;
        assert_eq!(engine.run_order_cycle().await.unwrap().executed, 1);
        assert_eq!(order(&engine, &id).await.status, OrderStatus::Executed);

        let stats = engine.get_stats().await;
        assert_eq!(stats.executions, 1);
        assert_eq!(stats.closed_orders, 1);
    }

    #[tokio::test]
    async fn test_status_lookup() {
        let gateway = Arc::new(ScriptedGateway::default());
        let (engine, _) = make_engine(gateway).await;
        let id = engine.create_limit_order(buy_order(dec!(20))).await.unwrap();

        let snapshot = engine.status(&id).await.unwrap();
        assert_eq!(snapshot.kind(), InstructionKind::LimitOrder);
        assert_eq!(snapshot.status_label(), "active");
        assert_eq!(
            engine.status("order_missing").await.unwrap_err(),
            EngineError::NotFound("order_missing".to_string())
        );
    }
}
