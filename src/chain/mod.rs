//! Per-chain HTLC access.
//!
//! A [`ChainSwapClient`] is bound to one leg of one order: it knows the
//! chain, asset, both parties, the amount, the timelock and the secret hash.
//! [`ChainClients`] builds them from stored legs; it is chosen once at
//! startup (in-process ledger for tests, gateway daemon in production).

pub mod gateway;
pub mod memory;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bitcoin::hashes::{Hash as _, sha256};
use serde::{Deserialize, Serialize};

use crate::order::{Asset, AtomicSwap, Chain};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiation {
    pub initiated: bool,
    pub tx_hash: String,
    pub confirmations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub redeemed: bool,
    pub secret: Vec<u8>,
    pub tx_hash: String,
}

#[async_trait]
pub trait ChainSwapClient: Send + Sync {
    async fn is_initiated(&self) -> Result<Initiation>;

    async fn is_redeemed(&self) -> Result<Redemption>;

    /// Locks the leg's amount in the HTLC. Requires a signing key.
    async fn initiate(&self) -> Result<String>;

    /// Claims the HTLC by revealing `secret`. Requires a signing key.
    async fn redeem(&self, secret: &[u8]) -> Result<String>;
}

/// Everything that identifies one HTLC on its chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtlcParams {
    pub chain: Chain,
    pub asset: Asset,
    pub initiator_address: String,
    pub redeemer_address: String,
    pub amount: String,
    pub timelock: u64,
    pub secret_hash: String,
}

impl HtlcParams {
    pub fn for_leg(leg: &AtomicSwap, secret_hash: &str) -> Self {
        Self {
            chain: leg.chain,
            asset: leg.asset.clone(),
            initiator_address: leg.initiator_address.clone(),
            redeemer_address: leg.redeemer_address.clone(),
            amount: leg.amount.clone(),
            timelock: leg.timelock,
            secret_hash: secret_hash.to_string(),
        }
    }
}

/// Hex-encoded signing key. Never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct PrivateKey(String);

impl PrivateKey {
    pub fn new(hex_key: impl Into<String>) -> Self {
        Self(hex_key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

pub trait ChainClients: Send + Sync {
    /// Builds the client for one leg. Without a key the client can only
    /// observe; `initiate`/`redeem` fail.
    fn client(
        &self,
        params: &HtlcParams,
        signer: Option<&PrivateKey>,
    ) -> Result<Arc<dyn ChainSwapClient>>;
}

/// Runs one chain call under `timeout`.
pub async fn timed<T, F>(what: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| anyhow::anyhow!("timeout after {timeout:?}"))
        .with_context(|| what.to_string())?
        .with_context(|| what.to_string())
}

pub fn sha256_hex(secret: &[u8]) -> String {
    hex::encode(sha256::Hash::hash(secret).to_byte_array())
}
