//! Data models for limit orders, DCA strategies and copy-trading configs.

mod copy_trade;
mod dca;
mod order;

use serde::Serialize;

pub use copy_trade::{
    CopyStatus, CopyTradeConfig, CopyTradeSpec, MirroredPosition, RiskLevel, TraderActivity,
};
pub use dca::{DcaSpec, DcaStatus, DcaStrategy, Frequency};
pub use order::{LimitOrder, LimitOrderSpec, OrderSide, OrderStatus};

/// Which collection an instruction lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    LimitOrder,
    Dca,
    CopyTrade,
}

impl InstructionKind {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            InstructionKind::LimitOrder => "order",
            InstructionKind::Dca => "dca",
            InstructionKind::CopyTrade => "copy",
        }
    }
}

/// Point-in-time copy of any stored instruction.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstructionSnapshot {
    LimitOrder(LimitOrder),
    Dca(DcaStrategy),
    CopyTrade(CopyTradeConfig),
}

impl InstructionSnapshot {
    pub fn kind(&self) -> InstructionKind {
        match self {
            InstructionSnapshot::LimitOrder(_) => InstructionKind::LimitOrder,
            InstructionSnapshot::Dca(_) => InstructionKind::Dca,
            InstructionSnapshot::CopyTrade(_) => InstructionKind::CopyTrade,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            InstructionSnapshot::LimitOrder(o) => &o.id,
            InstructionSnapshot::Dca(s) => &s.id,
            InstructionSnapshot::CopyTrade(c) => &c.id,
        }
    }

    /// Human-readable status label.
    pub fn status_label(&self) -> &'static str {
        match self {
            InstructionSnapshot::LimitOrder(o) => o.status.as_str(),
            InstructionSnapshot::Dca(s) => match s.status {
                DcaStatus::Active => "active",
                DcaStatus::Completed => "completed",
            },
            InstructionSnapshot::CopyTrade(c) => match c.status {
                CopyStatus::Active => "active",
                CopyStatus::Paused => "paused",
            },
        }
    }
}
