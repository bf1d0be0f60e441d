//! Response types for the HTTP price API.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;

/// Body of `GET /price?ids=...`. Fields other than `data` are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceResponse {
    #[serde(default)]
    pub data: HashMap<String, Option<PriceEntry>>,
}

/// Per-token entry; tokens the API cannot price come back as `null`.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceEntry {
    pub price: Decimal,
}

impl PriceResponse {
    /// Priced tokens only.
    pub fn into_snapshot(self) -> HashMap<String, Decimal> {
        self.data
            .into_iter()
            .filter_map(|(token, entry)| entry.map(|e| (token, e.price)))
            .collect()
    }
}
