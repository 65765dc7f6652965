use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use htlc_orderbook::api::auth::TokenTable;
use htlc_orderbook::api::{self, AppState};
use htlc_orderbook::chain::ChainClients;
use htlc_orderbook::chain::gateway::GatewayChainClients;
use htlc_orderbook::chain::memory::{MemoryChainClients, MemoryLedger};
use htlc_orderbook::config::{ExchangeConfig, NotifierConfig, PriceConfig, WatcherConfig};
use htlc_orderbook::notifier::Notifier;
use htlc_orderbook::order::store::{OrderStore, SqliteOrderStore};
use htlc_orderbook::price::{PriceChecker, StaticPriceOracle};
use htlc_orderbook::watcher::Watcher;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen_addr: String,

    #[arg(long)]
    store_path: PathBuf,

    /// Exchange config (assets, limits, prices, gateways), JSON.
    #[arg(long)]
    config: PathBuf,

    /// Bearer token table, JSON object `token -> address`.
    #[arg(long)]
    tokens: PathBuf,

    /// Use an in-process ledger instead of the configured gateways.
    #[arg(long, default_value_t = false)]
    simulated_chains: bool,

    #[arg(long, default_value_t = 5)]
    watch_interval_secs: u64,

    #[arg(long, default_value_t = 5)]
    rpc_timeout_secs: u64,

    #[arg(long, default_value_t = 3600)]
    fill_timeout_secs: u64,

    #[arg(long, default_value_t = 43_200)]
    initiate_timeout_secs: u64,

    #[arg(long, default_value_t = 2)]
    notify_interval_secs: u64,

    #[arg(long, default_value_t = 32)]
    notify_buffer: usize,

    #[arg(long, default_value_t = 60)]
    price_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    htlc_orderbook::logging::init().ok();

    let args = Args::parse();
    let listen_addr: SocketAddr = args.listen_addr.parse().context("parse listen_addr")?;

    let config = ExchangeConfig::load(&args.config).context("load exchange config")?;
    let tokens = TokenTable::load(&args.tokens).context("load tokens")?;
    let store: Arc<dyn OrderStore> = Arc::new(
        SqliteOrderStore::open(args.store_path, config.clone()).context("open sqlite store")?,
    );

    let rpc_timeout = Duration::from_secs(args.rpc_timeout_secs);
    let chains: Arc<dyn ChainClients> = if args.simulated_chains {
        tracing::warn!("using simulated chains");
        Arc::new(MemoryChainClients::new(MemoryLedger::new()))
    } else {
        Arc::new(
            GatewayChainClients::new(config.gateways.clone(), rpc_timeout)
                .context("create gateway clients")?,
        )
    };

    Watcher::new(
        store.clone(),
        chains,
        WatcherConfig {
            poll_interval: Duration::from_secs(args.watch_interval_secs),
            rpc_timeout,
            fill_timeout: Duration::from_secs(args.fill_timeout_secs),
            initiate_timeout: Duration::from_secs(args.initiate_timeout_secs),
        },
    )
    .spawn();

    PriceChecker::new(
        store.clone(),
        Arc::new(StaticPriceOracle::from_config(&config)),
        &config,
        PriceConfig {
            poll_interval: Duration::from_secs(args.price_interval_secs),
        },
    )
    .spawn();

    let notifier = Arc::new(Notifier::new(
        store.clone(),
        NotifierConfig {
            poll_interval: Duration::from_secs(args.notify_interval_secs),
            buffer: args.notify_buffer,
        },
    ));

    api::serve(
        listen_addr,
        AppState {
            store,
            notifier,
            auth: Arc::new(tokens),
        },
    )
    .await
}
