//! Signing context the engine requires before accepting instructions.

use std::str::FromStr;

use alloy_primitives::Address;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};

/// A connected wallet.
#[derive(Debug, Clone)]
pub struct Wallet {
    signer: PrivateKeySigner,
}

/// Freshly generated key pair.
#[derive(Debug, Clone)]
pub struct GeneratedWallet {
    pub address: Address,
    pub private_key: String,
}

impl Wallet {
    /// Connect from a hex private key, with or without `0x`.
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let pk = private_key.trim();
        let pk = pk.strip_prefix("0x").unwrap_or(pk);
        let signer = PrivateKeySigner::from_str(pk).context("Invalid private key")?;
        Ok(Self { signer })
    }

    /// Connect from `WALLET_PRIVATE_KEY`.
    pub fn from_env() -> Result<Self> {
        let private_key =
            std::env::var("WALLET_PRIVATE_KEY").context("WALLET_PRIVATE_KEY not set")?;
        Self::from_private_key(&private_key)
    }

    pub fn generate() -> GeneratedWallet {
        let signer = PrivateKeySigner::random();
        GeneratedWallet {
            address: Signer::address(&signer),
            private_key: format!("0x{}", hex::encode(signer.to_bytes())),
        }
    }

    pub fn address(&self) -> Address {
        Signer::address(&self.signer)
    }
}
