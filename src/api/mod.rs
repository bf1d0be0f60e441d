//! External collaborators: price oracle, execution gateway, trader feed.

mod feed;
mod gateway;
mod price_oracle;
mod types;

pub use feed::{BroadcastFeed, TraderFeed};
pub use gateway::{
    AmountUnit, ExecutionGateway, ExecutionKind, ExecutionParams, ExecutionReport,
    ExecutionRequest, SimulatedGateway,
};
pub use price_oracle::{HttpPriceOracle, PriceOracle, PriceSnapshot, StaticPriceOracle};
