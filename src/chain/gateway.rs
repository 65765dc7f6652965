//! HTTP adapter to a per-chain swap gateway.
//!
//! The gateway daemon owns the chain connection and transaction building:
//!
//! - `POST {base}/htlcs/status`   `{htlc}` -> [`HtlcStatus`]
//! - `POST {base}/htlcs/initiate` `{htlc, private_key}` -> `{tx_hash}`
//! - `POST {base}/htlcs/redeem`   `{htlc, private_key, secret}` -> `{tx_hash}`
//!
//! Signing requests are only sent to a gateway on the loopback interface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChainClients, ChainSwapClient, HtlcParams, Initiation, PrivateKey, Redemption};
use crate::order::Chain;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HtlcStatus {
    pub initiated: bool,
    #[serde(default)]
    pub initiate_tx_hash: String,
    #[serde(default)]
    pub confirmations: u64,
    pub redeemed: bool,
    /// Hex.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub redeem_tx_hash: String,
}

#[derive(Serialize)]
struct StatusRequest<'a> {
    htlc: &'a HtlcParams,
}

#[derive(Serialize)]
struct ActionRequest<'a> {
    htlc: &'a HtlcParams,
    private_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
}

#[derive(Deserialize)]
struct ActionResponse {
    tx_hash: String,
}

#[derive(Clone)]
pub struct GatewayChainClients {
    http: reqwest::Client,
    gateways: HashMap<Chain, String>,
}

impl GatewayChainClients {
    pub fn new(gateways: HashMap<Chain, String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build gateway http client")?;
        Ok(Self { http, gateways })
    }
}

impl ChainClients for GatewayChainClients {
    fn client(
        &self,
        params: &HtlcParams,
        signer: Option<&PrivateKey>,
    ) -> Result<Arc<dyn ChainSwapClient>> {
        let base = self
            .gateways
            .get(&params.chain)
            .with_context(|| format!("no gateway configured for {}", params.chain))?;
        if signer.is_some() {
            ensure_loopback(base)?;
        }
        Ok(Arc::new(GatewaySwapClient {
            http: self.http.clone(),
            base: base.trim_end_matches('/').to_string(),
            params: params.clone(),
            signer: signer.cloned(),
        }))
    }
}

fn ensure_loopback(base: &str) -> Result<()> {
    let url = reqwest::Url::parse(base).with_context(|| format!("parse gateway url {base}"))?;
    let host = url.host_str().unwrap_or_default();
    anyhow::ensure!(
        matches!(host, "127.0.0.1" | "localhost" | "[::1]" | "::1"),
        "refusing to send a signing key to non-local gateway {base}"
    );
    Ok(())
}

struct GatewaySwapClient {
    http: reqwest::Client,
    base: String,
    params: HtlcParams,
    signer: Option<PrivateKey>,
}

impl GatewaySwapClient {
    async fn status(&self) -> Result<HtlcStatus> {
        let resp = self
            .http
            .post(format!("{}/htlcs/status", self.base))
            .json(&StatusRequest { htlc: &self.params })
            .send()
            .await
            .context("send htlc status request")?
            .error_for_status()
            .context("htlc status")?;
        resp.json().await.context("decode htlc status")
    }

    async fn act(&self, action: &str, secret: Option<String>) -> Result<String> {
        let key = self
            .signer
            .as_ref()
            .with_context(|| format!("no signing key for {}", self.params.chain))?;
        let resp = self
            .http
            .post(format!("{}/htlcs/{action}", self.base))
            .json(&ActionRequest {
                htlc: &self.params,
                private_key: key.expose(),
                secret,
            })
            .send()
            .await
            .with_context(|| format!("send htlc {action} request"))?
            .error_for_status()
            .with_context(|| format!("htlc {action}"))?;
        let body: ActionResponse = resp
            .json()
            .await
            .with_context(|| format!("decode htlc {action} response"))?;
        Ok(body.tx_hash)
    }
}

#[async_trait]
impl ChainSwapClient for GatewaySwapClient {
    async fn is_initiated(&self) -> Result<Initiation> {
        let status = self.status().await?;
        Ok(Initiation {
            initiated: status.initiated,
            tx_hash: status.initiate_tx_hash,
            confirmations: status.confirmations,
        })
    }

    async fn is_redeemed(&self) -> Result<Redemption> {
        let status = self.status().await?;
        let secret = if status.redeemed {
            hex::decode(&status.secret).context("decode revealed secret")?
        } else {
            Vec::new()
        };
        Ok(Redemption {
            redeemed: status.redeemed,
            secret,
            tx_hash: status.redeem_tx_hash,
        })
    }

    async fn initiate(&self) -> Result<String> {
        self.act("initiate", None).await
    }

    async fn redeem(&self, secret: &[u8]) -> Result<String> {
        self.act("redeem", Some(hex::encode(secret))).await
    }
}
