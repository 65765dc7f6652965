//! Drives active orders through the state machine.
//!
//! Every cycle loads the active orders, asks each order's chains only what
//! its current status needs, and persists whatever [`machine::evaluate`]
//! returns. Nothing is kept between cycles; a restarted watcher resumes from
//! the store.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::task::JoinHandle;

use crate::chain::{ChainClients, HtlcParams, timed};
use crate::config::WatcherConfig;
use crate::machine::{self, Deadlines, LegObservation, Needs, Observations};
use crate::order::store::{OrderStore, blocking};
use crate::order::{AtomicSwap, Order, unix_now};

pub struct Watcher {
    store: Arc<dyn OrderStore>,
    chains: Arc<dyn ChainClients>,
    cfg: WatcherConfig,
}

impl Watcher {
    pub fn new(
        store: Arc<dyn OrderStore>,
        chains: Arc<dyn ChainClients>,
        cfg: WatcherConfig,
    ) -> Self {
        Self { store, chains, cfg }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        tracing::info!(poll_interval = ?self.cfg.poll_interval, "watcher started");
        loop {
            match self.poll_once().await {
                Ok(0) => {}
                Ok(updated) => tracing::debug!(updated, "watcher cycle"),
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "watcher cycle failed"),
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
    }

    /// One pass over the active orders. Returns how many were updated.
    /// Per-order failures are logged and leave that order untouched.
    pub async fn poll_once(&self) -> Result<usize> {
        let orders = blocking(&self.store, |store| store.get_active_orders())
            .await
            .context("load active orders")?;

        let mut updated = 0;
        for order in orders {
            match self.advance(&order).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        order_id = order.id,
                        status = %order.status,
                        error = %format!("{err:#}"),
                        "watcher: order skipped this cycle"
                    );
                }
            }
        }
        Ok(updated)
    }

    async fn advance(&self, order: &Order) -> Result<bool> {
        let obs = self.observe(order).await?;
        let deadlines = Deadlines {
            fill_timeout: self.cfg.fill_timeout,
            initiate_timeout: self.cfg.initiate_timeout,
        };
        let Some(next) = machine::evaluate(order, &obs, &deadlines, unix_now())? else {
            return Ok(false);
        };

        let persisted = next.clone();
        blocking(&self.store, move |store| store.update_order(&persisted))
            .await
            .with_context(|| format!("persist order {}", order.id))?;

        if next.status != order.status {
            tracing::info!(order_id = order.id, from = %order.status, to = %next.status, "order transition");
        } else {
            tracing::debug!(
                order_id = order.id,
                initiator_confirmations = next.initiator_atomic_swap.current_confirmations,
                follower_confirmations = next.follower_atomic_swap.current_confirmations,
                "order legs refreshed"
            );
        }
        Ok(true)
    }

    async fn observe(&self, order: &Order) -> Result<Observations> {
        let needs = Needs::for_status(order.status);
        let initiator = self
            .observe_leg(
                "initiator",
                &order.initiator_atomic_swap,
                &order.secret_hash,
                needs.initiator_initiation,
                needs.initiator_redemption,
            )
            .await?;
        let follower = self
            .observe_leg(
                "follower",
                &order.follower_atomic_swap,
                &order.secret_hash,
                needs.follower_initiation,
                needs.follower_redemption,
            )
            .await?;
        Ok(Observations {
            initiator,
            follower,
        })
    }

    async fn observe_leg(
        &self,
        side: &str,
        leg: &AtomicSwap,
        secret_hash: &str,
        initiation: bool,
        redemption: bool,
    ) -> Result<LegObservation> {
        let mut out = LegObservation::default();
        if !initiation && !redemption {
            return Ok(out);
        }

        let client = self
            .chains
            .client(&HtlcParams::for_leg(leg, secret_hash), None)
            .with_context(|| format!("{side} client on {}", leg.chain))?;
        if initiation {
            out.initiation = Some(
                timed(
                    &format!("{side} is_initiated on {}", leg.chain),
                    self.cfg.rpc_timeout,
                    client.is_initiated(),
                )
                .await?,
            );
        }
        if redemption {
            out.redemption = Some(
                timed(
                    &format!("{side} is_redeemed on {}", leg.chain),
                    self.cfg.rpc_timeout,
                    client.is_redeemed(),
                )
                .await?,
            );
        }
        Ok(out)
    }
}
