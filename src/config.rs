use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::order::{Asset, Chain, OrderError};

/// Per-asset trading limits and HTLC parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub chain: Chain,
    pub asset: Asset,
    pub decimals: u32,
    /// Inclusive bounds in base units, decimal strings.
    pub min_amount: String,
    pub max_amount: String,
    pub min_confirmations: u64,
    /// Timelock of a leg on this asset when it is the initiator (maker) leg.
    pub initiator_timelock: u64,
    /// Timelock when it is the follower leg; must be shorter than any
    /// initiator timelock it is paired with.
    pub follower_timelock: u64,
}

impl AssetConfig {
    pub fn new(chain: Chain, asset: Asset, decimals: u32) -> Self {
        let (initiator_timelock, follower_timelock) = if chain.is_evm() {
            (14_400, 7_200)
        } else {
            (288, 144)
        };
        Self {
            chain,
            asset,
            decimals,
            min_amount: "1".to_string(),
            max_amount: u128::MAX.to_string(),
            min_confirmations: 1,
            initiator_timelock,
            follower_timelock,
        }
    }

    pub fn check_amount(&self, field: &str, amount: u128) -> Result<(), OrderError> {
        let min: u128 = self.min_amount.parse().unwrap_or(0);
        let max: u128 = self.max_amount.parse().unwrap_or(u128::MAX);
        if amount < min || amount > max {
            return Err(OrderError::Validation(format!(
                "{field} {amount} outside [{min}, {max}] for {}:{}",
                self.chain, self.asset
            )));
        }
        Ok(())
    }

    /// Converts base units to whole units.
    pub fn to_units(&self, amount: u128) -> f64 {
        amount as f64 / 10f64.powi(self.decimals as i32)
    }
}

/// Exchange-wide settings, loaded once at startup and injected into the
/// store, API and bot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub assets: Vec<AssetConfig>,
    /// Static USD prices keyed by `<chain>:<asset>`.
    #[serde(default)]
    pub prices: HashMap<String, f64>,
    #[serde(default)]
    pub max_order_value_usd: Option<f64>,
    /// Base URL of each chain's swap gateway.
    #[serde(default)]
    pub gateways: HashMap<Chain, String>,
}

impl ExchangeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read exchange config {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse exchange config {}", path.display()))?;
        cfg.validate().context("validate exchange config")?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for a in &self.assets {
            let min: u128 = a
                .min_amount
                .parse()
                .with_context(|| format!("min_amount of {}:{}", a.chain, a.asset))?;
            let max: u128 = a
                .max_amount
                .parse()
                .with_context(|| format!("max_amount of {}:{}", a.chain, a.asset))?;
            anyhow::ensure!(min <= max, "min_amount > max_amount for {}:{}", a.chain, a.asset);
            anyhow::ensure!(
                a.follower_timelock < a.initiator_timelock,
                "follower_timelock must be < initiator_timelock for {}:{}",
                a.chain,
                a.asset
            );
        }
        Ok(())
    }

    pub fn asset(&self, chain: Chain, asset: &Asset) -> Option<&AssetConfig> {
        self.assets
            .iter()
            .find(|a| a.chain == chain && &a.asset == asset)
    }

    pub fn require_asset(&self, chain: Chain, asset: &Asset) -> Result<&AssetConfig, OrderError> {
        self.asset(chain, asset).ok_or_else(|| {
            OrderError::Validation(format!("unsupported asset {chain}:{asset}"))
        })
    }

    pub fn static_price(&self, chain: Chain, asset: &Asset) -> Option<f64> {
        self.prices.get(&format!("{chain}:{asset}")).copied()
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Bound on each chain call.
    pub rpc_timeout: Duration,
    /// Filled orders whose initiator never locks funds fail softly after this.
    pub fill_timeout: Duration,
    /// Initiated orders whose follower never locks funds fail hard after this.
    pub initiate_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            rpc_timeout: Duration::from_secs(5),
            fill_timeout: Duration::from_secs(3600),
            initiate_timeout: Duration::from_secs(12 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub poll_interval: Duration,
    /// Per-subscription queue capacity; a full queue disconnects.
    pub buffer: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            buffer: 32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub poll_interval: Duration,
    pub rpc_timeout: Duration,
    /// Account the bot trades as (the maker/taker field of its orders).
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct PriceConfig {
    pub poll_interval: Duration,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
        }
    }
}
