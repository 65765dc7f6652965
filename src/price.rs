//! USD prices for configured assets.
//!
//! The [`PriceChecker`] loop copies oracle prices into the store, where
//! order creation snapshots them into each leg's `price_by_oracle` and
//! `value_locked` reads them back.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::config::{ExchangeConfig, PriceConfig};
use crate::order::store::{OrderStore, blocking};
use crate::order::{Asset, Chain};

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price(&self, chain: Chain, asset: &Asset) -> Result<f64>;
}

/// Fixed prices from the exchange config.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    prices: HashMap<(Chain, Asset), f64>,
}

impl StaticPriceOracle {
    pub fn from_config(config: &ExchangeConfig) -> Self {
        let prices = config
            .assets
            .iter()
            .filter_map(|a| {
                config
                    .static_price(a.chain, &a.asset)
                    .map(|p| ((a.chain, a.asset.clone()), p))
            })
            .collect();
        Self { prices }
    }

    pub fn set(&mut self, chain: Chain, asset: Asset, price: f64) {
        self.prices.insert((chain, asset), price);
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn price(&self, chain: Chain, asset: &Asset) -> Result<f64> {
        self.prices
            .get(&(chain, asset.clone()))
            .copied()
            .with_context(|| format!("no price for {chain}:{asset}"))
    }
}

pub struct PriceChecker {
    store: Arc<dyn OrderStore>,
    oracle: Arc<dyn PriceOracle>,
    assets: Vec<(Chain, Asset)>,
    cfg: PriceConfig,
}

impl PriceChecker {
    pub fn new(
        store: Arc<dyn OrderStore>,
        oracle: Arc<dyn PriceOracle>,
        config: &ExchangeConfig,
        cfg: PriceConfig,
    ) -> Self {
        let assets = config
            .assets
            .iter()
            .map(|a| (a.chain, a.asset.clone()))
            .collect();
        Self {
            store,
            oracle,
            assets,
            cfg,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(err) = self.poll_once().await {
                    tracing::warn!(error = %format!("{err:#}"), "price checker cycle failed");
                }
                tokio::time::sleep(self.cfg.poll_interval).await;
            }
        })
    }

    /// Refreshes every configured asset. Returns how many prices were stored.
    pub async fn poll_once(&self) -> Result<usize> {
        let mut stored = 0;
        for (chain, asset) in &self.assets {
            let price = match self.oracle.price(*chain, asset).await {
                Ok(price) if price.is_finite() && price >= 0.0 => price,
                Ok(price) => {
                    tracing::warn!(%chain, %asset, price, "price checker: ignoring invalid price");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(%chain, %asset, error = %format!("{err:#}"), "price checker: fetch failed");
                    continue;
                }
            };

            let (chain, asset) = (*chain, asset.clone());
            blocking(&self.store, move |store| store.set_price(chain, &asset, price))
                .await
                .context("store price")?;
            stored += 1;
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssetConfig;

    #[tokio::test]
    async fn static_oracle_reads_config_prices() {
        let config = ExchangeConfig {
            assets: vec![
                AssetConfig::new(Chain::BitcoinRegtest, Asset::Primary, 8),
                AssetConfig::new(Chain::EthereumLocalnet, Asset::Primary, 18),
            ],
            prices: HashMap::from([("bitcoin_regtest:primary".to_string(), 60_000.0)]),
            ..Default::default()
        };
        let oracle = StaticPriceOracle::from_config(&config);

        assert_eq!(
            oracle
                .price(Chain::BitcoinRegtest, &Asset::Primary)
                .await
                .unwrap(),
            60_000.0
        );
        assert!(
            oracle
                .price(Chain::EthereumLocalnet, &Asset::Primary)
                .await
                .is_err()
        );
    }
}
