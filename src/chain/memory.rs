//! In-process HTLC ledger. Every chain is a block height plus a table of
//! HTLCs keyed by `(chain, secret_hash)`. Used by tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use super::{ChainClients, ChainSwapClient, HtlcParams, Initiation, PrivateKey, Redemption, sha256_hex};
use crate::order::Chain;

#[derive(Debug, Clone)]
pub struct HtlcSnapshot {
    pub params: HtlcParams,
    pub initiate_tx: String,
    pub initiated_at_height: u64,
    pub redeem_tx: Option<String>,
    pub secret: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct LedgerState {
    heights: HashMap<Chain, u64>,
    htlcs: HashMap<(Chain, String), HtlcSnapshot>,
    offline: HashSet<Chain>,
    next_tx: u64,
}

impl LedgerState {
    fn ensure_online(&self, chain: Chain) -> Result<()> {
        anyhow::ensure!(!self.offline.contains(&chain), "{chain} rpc unavailable");
        Ok(())
    }

    fn tx_hash(&mut self, chain: Chain) -> String {
        self.next_tx += 1;
        format!("{chain}-tx-{:04}", self.next_tx)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&self, chain: Chain) -> u64 {
        let state = self.state.lock().expect("ledger mutex poisoned");
        state.heights.get(&chain).copied().unwrap_or(0)
    }

    pub fn mine(&self, chain: Chain, blocks: u64) {
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        *state.heights.entry(chain).or_default() += blocks;
    }

    /// Makes every call against `chain` fail until switched back.
    pub fn set_offline(&self, chain: Chain, offline: bool) {
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        if offline {
            state.offline.insert(chain);
        } else {
            state.offline.remove(&chain);
        }
    }

    pub fn htlc(&self, chain: Chain, secret_hash: &str) -> Option<HtlcSnapshot> {
        let state = self.state.lock().expect("ledger mutex poisoned");
        state.htlcs.get(&(chain, secret_hash.to_string())).cloned()
    }

    pub fn initiate(&self, params: &HtlcParams) -> Result<String> {
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        state.ensure_online(params.chain)?;
        let key = (params.chain, params.secret_hash.clone());
        anyhow::ensure!(
            !state.htlcs.contains_key(&key),
            "htlc already initiated on {} for {}",
            params.chain,
            params.secret_hash
        );
        let height = state.heights.get(&params.chain).copied().unwrap_or(0);
        let tx = state.tx_hash(params.chain);
        state.htlcs.insert(
            key,
            HtlcSnapshot {
                params: params.clone(),
                initiate_tx: tx.clone(),
                initiated_at_height: height,
                redeem_tx: None,
                secret: None,
            },
        );
        Ok(tx)
    }

    pub fn redeem(&self, params: &HtlcParams, secret: &[u8]) -> Result<String> {
        let mut state = self.state.lock().expect("ledger mutex poisoned");
        state.ensure_online(params.chain)?;
        anyhow::ensure!(
            sha256_hex(secret) == params.secret_hash,
            "secret does not match secret hash {}",
            params.secret_hash
        );
        let tx = state.tx_hash(params.chain);
        let htlc = state
            .htlcs
            .get_mut(&(params.chain, params.secret_hash.clone()))
            .ok_or_else(|| anyhow::anyhow!("htlc not initiated on {}", params.chain))?;
        anyhow::ensure!(htlc.redeem_tx.is_none(), "htlc already redeemed");
        htlc.redeem_tx = Some(tx.clone());
        htlc.secret = Some(secret.to_vec());
        Ok(tx)
    }

    fn initiation(&self, params: &HtlcParams) -> Result<Initiation> {
        let state = self.state.lock().expect("ledger mutex poisoned");
        state.ensure_online(params.chain)?;
        let height = state.heights.get(&params.chain).copied().unwrap_or(0);
        Ok(
            match state.htlcs.get(&(params.chain, params.secret_hash.clone())) {
                Some(htlc) => Initiation {
                    initiated: true,
                    tx_hash: htlc.initiate_tx.clone(),
                    confirmations: height.saturating_sub(htlc.initiated_at_height),
                },
                None => Initiation::default(),
            },
        )
    }

    fn redemption(&self, params: &HtlcParams) -> Result<Redemption> {
        let state = self.state.lock().expect("ledger mutex poisoned");
        state.ensure_online(params.chain)?;
        Ok(
            match state.htlcs.get(&(params.chain, params.secret_hash.clone())) {
                Some(HtlcSnapshot {
                    redeem_tx: Some(tx),
                    secret: Some(secret),
                    ..
                }) => Redemption {
                    redeemed: true,
                    secret: secret.clone(),
                    tx_hash: tx.clone(),
                },
                _ => Redemption::default(),
            },
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryChainClients {
    ledger: MemoryLedger,
}

impl MemoryChainClients {
    pub fn new(ledger: MemoryLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }
}

impl ChainClients for MemoryChainClients {
    fn client(
        &self,
        params: &HtlcParams,
        signer: Option<&PrivateKey>,
    ) -> Result<Arc<dyn ChainSwapClient>> {
        Ok(Arc::new(MemorySwapClient {
            ledger: self.ledger.clone(),
            params: params.clone(),
            can_sign: signer.is_some(),
        }))
    }
}

struct MemorySwapClient {
    ledger: MemoryLedger,
    params: HtlcParams,
    can_sign: bool,
}

#[async_trait]
impl ChainSwapClient for MemorySwapClient {
    async fn is_initiated(&self) -> Result<Initiation> {
        self.ledger.initiation(&self.params)
    }

    async fn is_redeemed(&self) -> Result<Redemption> {
        self.ledger.redemption(&self.params)
    }

    async fn initiate(&self) -> Result<String> {
        anyhow::ensure!(self.can_sign, "no signing key for {}", self.params.chain);
        self.ledger.initiate(&self.params)
    }

    async fn redeem(&self, secret: &[u8]) -> Result<String> {
        anyhow::ensure!(self.can_sign, "no signing key for {}", self.params.chain);
        self.ledger.redeem(&self.params, secret)
    }
}
