//! Trading logic: trigger evaluation, DCA scheduling, copy-trade allocation.

mod allocator;
mod config;
pub mod scheduler;
pub mod triggers;

pub use allocator::{CopyAllocator, CopyDecision, EntryPlan, ExitPlan, ExitReason};
pub use config::EngineConfig;
pub use triggers::{OrderTrigger, TriggerReason};
