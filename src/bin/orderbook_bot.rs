use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use htlc_orderbook::chain::gateway::GatewayChainClients;
use htlc_orderbook::config::{ExchangeConfig, ExecutorConfig};
use htlc_orderbook::executor::{Executor, Keychain, RestFeed, SecretBook};

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    orderbook_url: String,

    /// Exchange config; only the gateways are used.
    #[arg(long)]
    config: PathBuf,

    /// JSON object `chain -> private key hex`.
    #[arg(long)]
    keys: PathBuf,

    /// JSON object `secret hash -> secret hex`.
    #[arg(long)]
    secrets: Option<PathBuf>,

    /// Address the bot trades as.
    #[arg(long)]
    address: String,

    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,

    #[arg(long, default_value_t = 10)]
    rpc_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    htlc_orderbook::logging::init().ok();

    let args = Args::parse();
    let config = ExchangeConfig::load(&args.config).context("load exchange config")?;
    let keys = Keychain::load(&args.keys).context("load keys")?;
    let secrets = match &args.secrets {
        Some(path) => SecretBook::load(path).context("load secrets")?,
        None => SecretBook::default(),
    };

    let rpc_timeout = Duration::from_secs(args.rpc_timeout_secs);
    let feed = RestFeed::new(&args.orderbook_url, rpc_timeout).context("create orderbook feed")?;
    let chains = GatewayChainClients::new(config.gateways, rpc_timeout)
        .context("create gateway clients")?;

    let handle = Executor::new(
        Arc::new(feed),
        Arc::new(chains),
        keys,
        secrets,
        ExecutorConfig {
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            rpc_timeout,
            address: args.address,
        },
    )
    .spawn();

    tokio::select! {
        res = handle => res.context("executor task")?,
        res = tokio::signal::ctrl_c() => {
            res.context("wait for ctrl-c")?;
            tracing::info!("shutting down");
        }
    }
    Ok(())
}
