//! Engine configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Cadences and execution parameters for the instruction engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between limit-order / copy stop-loss passes
    pub order_check_interval_secs: u64,

    /// Seconds between DCA passes
    pub dca_check_interval_secs: u64,

    /// Slippage tolerance sent with every execution (0.0 to 1.0)
    pub default_slippage: Decimal,

    /// Drop below entry that closes a mirrored position (0.0 to 1.0)
    pub copy_stop_loss_pct: Decimal,

    /// Buffered trader events per copy-trading subscription
    pub activity_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order_check_interval_secs: 5,
            dca_check_interval_secs: 60,
            default_slippage: dec!(0.005),   // 0.5%
            copy_stop_loss_pct: dec!(0.15),  // 15% below entry
            activity_buffer: 256,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `AUTOTRADER_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            order_check_interval_secs: env_or("AUTOTRADER_ORDER_INTERVAL_SECS", defaults.order_check_interval_secs),
            dca_check_interval_secs: env_or("AUTOTRADER_DCA_INTERVAL_SECS", defaults.dca_check_interval_secs),
            default_slippage: env_or("AUTOTRADER_DEFAULT_SLIPPAGE", defaults.default_slippage),
            copy_stop_loss_pct: env_or("AUTOTRADER_COPY_STOP_LOSS_PCT", defaults.copy_stop_loss_pct),
            activity_buffer: env_or("AUTOTRADER_ACTIVITY_BUFFER", defaults.activity_buffer),
        }
    }

    pub fn order_check_interval(&self) -> Duration {
        Duration::from_secs(self.order_check_interval_secs.max(1))
    }

    pub fn dca_check_interval(&self) -> Duration {
        Duration::from_secs(self.dca_check_interval_secs.max(1))
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
