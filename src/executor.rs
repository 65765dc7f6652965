//! Counterparty automation.
//!
//! The bot trades as one address. Each cycle it looks for orders where it
//! owes the next chain action and submits it:
//!
//! | role  | order status          | action                                   |
//! |-------|-----------------------|------------------------------------------|
//! | maker | Filled                | initiate the initiator leg               |
//! | taker | InitiatorInitiated    | initiate the follower leg                |
//! | maker | FollowerInitiated     | redeem the follower leg with own secret  |
//! | taker | FollowerRedeemed      | redeem the initiator leg with `secret`   |
//!
//! Failures are per order, and a category whose fetch fails is skipped. The
//! cycle itself fails only when no category could be fetched. Nothing is
//! retried inside a cycle; the order stays in its category until the watcher
//! sees the action land.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::chain::{ChainClients, ChainSwapClient, HtlcParams, PrivateKey, sha256_hex, timed};
use crate::config::ExecutorConfig;
use crate::order::store::{OrderFilter, OrderStore, blocking};
use crate::order::{AtomicSwap, Chain, Order, OrderStatus};

/// Signing keys by chain, from a JSON object `{"<chain>": "<hex key>"}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Keychain {
    keys: HashMap<Chain, PrivateKey>,
}

impl Keychain {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read keychain {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse keychain {}", path.display()))
    }

    pub fn insert(&mut self, chain: Chain, key: PrivateKey) {
        self.keys.insert(chain, key);
    }

    pub fn get(&self, chain: Chain) -> Option<&PrivateKey> {
        self.keys.get(&chain)
    }
}

/// The maker's secrets, from a JSON object `{"<secret hash>": "<hex secret>"}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SecretBook {
    secrets: HashMap<String, String>,
}

impl SecretBook {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read secrets {}", path.display()))?;
        let book: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse secrets {}", path.display()))?;
        Ok(Self {
            secrets: book
                .secrets
                .into_iter()
                .map(|(hash, secret)| (hash.to_ascii_lowercase(), secret))
                .collect(),
        })
    }

    /// Stores `secret` and returns its hash.
    pub fn insert(&mut self, secret: &[u8]) -> String {
        let hash = sha256_hex(secret);
        self.secrets.insert(hash.clone(), hex::encode(secret));
        hash
    }

    pub fn secret(&self, secret_hash: &str) -> Result<Vec<u8>> {
        let encoded = self
            .secrets
            .get(&secret_hash.to_ascii_lowercase())
            .with_context(|| format!("no secret for hash {secret_hash}"))?;
        let secret = hex::decode(encoded).context("decode secret")?;
        anyhow::ensure!(
            sha256_hex(&secret) == secret_hash.to_ascii_lowercase(),
            "stored secret does not match hash {secret_hash}"
        );
        Ok(secret)
    }
}

/// Where the bot reads orders from.
#[async_trait]
pub trait OrderFeed: Send + Sync {
    async fn orders(&self, filter: OrderFilter) -> Result<Vec<Order>>;
}

/// Reads the store directly, for a bot running inside the server process.
pub struct StoreFeed {
    store: Arc<dyn OrderStore>,
}

impl StoreFeed {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OrderFeed for StoreFeed {
    async fn orders(&self, filter: OrderFilter) -> Result<Vec<Order>> {
        blocking(&self.store, move |store| store.filter_orders(&filter)).await
    }
}

/// Reads `GET /orders` of an orderbook server.
pub struct RestFeed {
    http: reqwest::Client,
    base: String,
}

impl RestFeed {
    pub fn new(base: &str, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build orderbook http client")?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl OrderFeed for RestFeed {
    async fn orders(&self, filter: OrderFilter) -> Result<Vec<Order>> {
        let resp = self
            .http
            .get(format!("{}/orders", self.base))
            .query(&filter)
            .query(&[("verbose", "true")])
            .send()
            .await
            .context("send orders request")?
            .error_for_status()
            .context("list orders")?;
        resp.json().await.context("decode orders")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    InitiateInitiator,
    InitiateFollower,
    RedeemFollower,
    RedeemInitiator,
}

impl Action {
    const ALL: [Action; 4] = [
        Action::InitiateInitiator,
        Action::InitiateFollower,
        Action::RedeemFollower,
        Action::RedeemInitiator,
    ];

    fn filter(self, address: &str) -> OrderFilter {
        let (maker, taker, status) = match self {
            Action::InitiateInitiator => (Some(address), None, OrderStatus::Filled),
            Action::InitiateFollower => (None, Some(address), OrderStatus::InitiatorAtomicSwapInitiated),
            Action::RedeemFollower => (Some(address), None, OrderStatus::FollowerAtomicSwapInitiated),
            Action::RedeemInitiator => (None, Some(address), OrderStatus::FollowerAtomicSwapRedeemed),
        };
        OrderFilter {
            maker: maker.map(str::to_string),
            taker: taker.map(str::to_string),
            status: Some(status),
            sort: Some("id".to_string()),
            per_page: Some(100),
            ..Default::default()
        }
    }

    fn leg(self, order: &Order) -> &AtomicSwap {
        match self {
            Action::InitiateInitiator | Action::RedeemInitiator => &order.initiator_atomic_swap,
            Action::InitiateFollower | Action::RedeemFollower => &order.follower_atomic_swap,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Action::InitiateInitiator => "initiate initiator leg",
            Action::InitiateFollower => "initiate follower leg",
            Action::RedeemFollower => "redeem follower leg",
            Action::RedeemInitiator => "redeem initiator leg",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorReport {
    /// Order ids whose HTLC this cycle locked funds in.
    pub initiated: Vec<i64>,
    pub redeemed: Vec<i64>,
    pub failed: Vec<i64>,
}

impl ExecutorReport {
    pub fn is_empty(&self) -> bool {
        self.initiated.is_empty() && self.redeemed.is_empty() && self.failed.is_empty()
    }
}

pub struct Executor {
    feed: Arc<dyn OrderFeed>,
    chains: Arc<dyn ChainClients>,
    keys: Keychain,
    secrets: SecretBook,
    cfg: ExecutorConfig,
}

impl Executor {
    pub fn new(
        feed: Arc<dyn OrderFeed>,
        chains: Arc<dyn ChainClients>,
        keys: Keychain,
        secrets: SecretBook,
        cfg: ExecutorConfig,
    ) -> Self {
        Self {
            feed,
            chains,
            keys,
            secrets,
            cfg,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(address = %self.cfg.address, "executor started");
            loop {
                match self.run_once().await {
                    Ok(report) if report.is_empty() => {}
                    Ok(report) => tracing::info!(?report, "executor cycle"),
                    Err(err) => {
                        tracing::warn!(error = %format!("{err:#}"), "executor cycle failed");
                    }
                }
                tokio::time::sleep(self.cfg.poll_interval).await;
            }
        })
    }

    /// One pass over the four action categories.
    pub async fn run_once(&self) -> Result<ExecutorReport> {
        let mut report = ExecutorReport::default();
        let mut fetch_errors = Vec::new();
        for action in Action::ALL {
            let orders = match self
                .feed
                .orders(action.filter(&self.cfg.address))
                .await
                .with_context(|| format!("fetch orders to {}", action.as_str()))
            {
                Ok(orders) => orders,
                Err(err) => {
                    tracing::warn!(action = action.as_str(), error = %format!("{err:#}"), "executor: category skipped");
                    fetch_errors.push(err);
                    continue;
                }
            };

            for order in orders {
                match self.act(action, &order).await {
                    Ok(None) => {}
                    Ok(Some(tx_hash)) => {
                        tracing::info!(order_id = order.id, action = action.as_str(), %tx_hash, "executor submitted");
                        match action {
                            Action::InitiateInitiator | Action::InitiateFollower => {
                                report.initiated.push(order.id)
                            }
                            Action::RedeemFollower | Action::RedeemInitiator => {
                                report.redeemed.push(order.id)
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            order_id = order.id,
                            action = action.as_str(),
                            error = %format!("{err:#}"),
                            "executor: order skipped"
                        );
                        report.failed.push(order.id);
                    }
                }
            }
        }
        if fetch_errors.len() == Action::ALL.len() {
            if let Some(err) = fetch_errors.pop() {
                return Err(err);
            }
        }
        Ok(report)
    }

    /// `None` when the chain already shows the action.
    async fn act(&self, action: Action, order: &Order) -> Result<Option<String>> {
        let leg = action.leg(order);
        let key = self
            .keys
            .get(leg.chain)
            .with_context(|| format!("no private key for {}", leg.chain))?;
        let client = self
            .chains
            .client(&HtlcParams::for_leg(leg, &order.secret_hash), Some(key))
            .with_context(|| format!("client for {}", leg.chain))?;

        match action {
            Action::InitiateInitiator | Action::InitiateFollower => self.initiate(&*client, leg).await,
            Action::RedeemFollower => {
                let secret = self.secrets.secret(&order.secret_hash)?;
                self.redeem(&*client, leg, &secret).await
            }
            Action::RedeemInitiator => {
                let encoded = order
                    .secret
                    .as_deref()
                    .context("order has no revealed secret")?;
                let secret = hex::decode(encoded).context("decode revealed secret")?;
                self.redeem(&*client, leg, &secret).await
            }
        }
    }

    async fn initiate(&self, client: &dyn ChainSwapClient, leg: &AtomicSwap) -> Result<Option<String>> {
        let seen = timed("is_initiated", self.cfg.rpc_timeout, client.is_initiated()).await?;
        if seen.initiated {
            return Ok(None);
        }
        let tx = timed(
            &format!("initiate on {}", leg.chain),
            self.cfg.rpc_timeout,
            client.initiate(),
        )
        .await?;
        Ok(Some(tx))
    }

    async fn redeem(
        &self,
        client: &dyn ChainSwapClient,
        leg: &AtomicSwap,
        secret: &[u8],
    ) -> Result<Option<String>> {
        let seen = timed("is_redeemed", self.cfg.rpc_timeout, client.is_redeemed()).await?;
        if seen.redeemed {
            return Ok(None);
        }
        let tx = timed(
            &format!("redeem on {}", leg.chain),
            self.cfg.rpc_timeout,
            client.redeem(secret),
        )
        .await?;
        Ok(Some(tx))
    }
}
