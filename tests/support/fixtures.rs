use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use bitcoin::hashes::Hash as _;
use bitcoin::{Address, NetworkKind, PubkeyHash};
use tempfile::TempDir;

use htlc_orderbook::chain::memory::{MemoryChainClients, MemoryLedger};
use htlc_orderbook::chain::{ChainClients, HtlcParams, PrivateKey, sha256_hex};
use htlc_orderbook::config::{AssetConfig, ExchangeConfig, WatcherConfig};
use htlc_orderbook::order::store::{OrderStore, SqliteOrderStore};
use htlc_orderbook::order::{Asset, Chain, NewOrder, Order};

pub const PAIR: &str = "bitcoin_regtest:primary-ethereum_localnet:primary";
pub const MAKER: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
pub const TAKER: &str = "0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc";

/// Legacy regtest address derived from a fixed key hash.
pub fn btc_address(seed: u8) -> String {
    Address::p2pkh(PubkeyHash::from_byte_array([seed; 20]), NetworkKind::Test).to_string()
}

pub fn eth_address(seed: u8) -> String {
    format!("0x{}", hex::encode([seed; 20]))
}

pub fn exchange_config() -> ExchangeConfig {
    ExchangeConfig {
        assets: vec![
            AssetConfig::new(Chain::BitcoinRegtest, Asset::Primary, 8),
            AssetConfig::new(Chain::EthereumLocalnet, Asset::Primary, 18),
        ],
        prices: HashMap::from([
            ("bitcoin_regtest:primary".to_string(), 60_000.0),
            ("ethereum_localnet:primary".to_string(), 3_000.0),
        ]),
        max_order_value_usd: None,
        gateways: HashMap::new(),
    }
}

pub fn open_store(dir: &TempDir, config: ExchangeConfig) -> Result<Arc<SqliteOrderStore>> {
    let path = dir.path().join("orderbook.sqlite3");
    Ok(Arc::new(
        SqliteOrderStore::open(path, config).context("open sqlite store")?,
    ))
}

/// Maker sends 100 sats, wants 200 wei.
pub fn new_order(secret: &[u8]) -> NewOrder {
    NewOrder {
        creator: MAKER.to_string(),
        send_address: btc_address(1),
        receive_address: eth_address(0xaa),
        order_pair: PAIR.to_string(),
        send_amount: "100".to_string(),
        receive_amount: "200".to_string(),
        secret_hash: sha256_hex(secret),
    }
}

pub fn fill(store: &dyn OrderStore, order_id: i64) -> Result<()> {
    store.fill_order(order_id, TAKER, &eth_address(0xbb), &btc_address(2))
}

pub fn load(store: &dyn OrderStore, order_id: i64) -> Result<Order> {
    store
        .get_order(order_id)?
        .with_context(|| format!("order {order_id} missing"))
}

pub fn fast_watcher() -> WatcherConfig {
    WatcherConfig {
        poll_interval: Duration::from_millis(20),
        rpc_timeout: Duration::from_secs(1),
        fill_timeout: Duration::from_secs(3600),
        initiate_timeout: Duration::from_secs(3600),
    }
}

/// A store, an in-memory ledger and the chain clients over it.
pub struct Exchange {
    pub dir: TempDir,
    pub store: Arc<SqliteOrderStore>,
    pub ledger: MemoryLedger,
    pub chains: Arc<MemoryChainClients>,
}

impl Exchange {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let store = open_store(&dir, exchange_config())?;
        let ledger = MemoryLedger::new();
        let chains = Arc::new(MemoryChainClients::new(ledger.clone()));
        Ok(Self {
            dir,
            store,
            ledger,
            chains,
        })
    }

    pub fn store(&self) -> Arc<dyn OrderStore> {
        self.store.clone()
    }

    pub fn chains(&self) -> Arc<dyn ChainClients> {
        self.chains.clone()
    }

    /// Created and filled order for `secret`.
    pub fn filled_order(&self, secret: &[u8]) -> Result<i64> {
        let id = self.store.create_order(&new_order(secret))?;
        fill(&*self.store, id)?;
        Ok(id)
    }

    pub async fn initiate_initiator(&self, order: &Order) -> Result<String> {
        self.client(order, true)?.initiate().await
    }

    pub async fn initiate_follower(&self, order: &Order) -> Result<String> {
        self.client(order, false)?.initiate().await
    }

    pub async fn redeem_initiator(&self, order: &Order, secret: &[u8]) -> Result<String> {
        self.client(order, true)?.redeem(secret).await
    }

    pub async fn redeem_follower(&self, order: &Order, secret: &[u8]) -> Result<String> {
        self.client(order, false)?.redeem(secret).await
    }

    fn client(
        &self,
        order: &Order,
        initiator: bool,
    ) -> Result<Arc<dyn htlc_orderbook::chain::ChainSwapClient>> {
        let leg = if initiator {
            &order.initiator_atomic_swap
        } else {
            &order.follower_atomic_swap
        };
        self.chains.client(
            &HtlcParams::for_leg(leg, &order.secret_hash),
            Some(&PrivateKey::new("00")),
        )
    }
}
