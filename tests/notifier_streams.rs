mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use futures::StreamExt as _;

use htlc_orderbook::config::NotifierConfig;
use htlc_orderbook::notifier::{Notifier, SubscriptionKind, SubscriptionStream, Update};
use htlc_orderbook::order::store::OrderStore as _;
use htlc_orderbook::order::{Chain, Order, OrderStatus};
use htlc_orderbook::watcher::Watcher;

use support::fixtures::{Exchange, MAKER, PAIR, fast_watcher, fill, new_order};
use support::wait::wait_for;

fn notifier(ex: &Exchange, buffer: usize) -> Arc<Notifier> {
    Arc::new(Notifier::new(
        ex.store(),
        NotifierConfig {
            poll_interval: Duration::from_millis(20),
            buffer,
        },
    ))
}

async fn next(stream: &mut SubscriptionStream) -> Result<Option<Update>> {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .context("no update within 5s")
}

async fn next_order(stream: &mut SubscriptionStream) -> Result<Order> {
    match next(stream).await? {
        Some(Update::Order(order)) => Ok(order),
        other => anyhow::bail!("expected an order update, got {other:?}"),
    }
}

async fn next_orders(stream: &mut SubscriptionStream) -> Result<Vec<Order>> {
    match next(stream).await? {
        Some(Update::Orders(orders)) => Ok(orders),
        other => anyhow::bail!("expected an orders update, got {other:?}"),
    }
}

#[tokio::test]
async fn order_subscription_follows_changes_until_terminal() -> Result<()> {
    let ex = Exchange::new()?;
    let notifier = notifier(&ex, 8);
    let id = ex.store.create_order(&new_order(b"follow me"))?;

    let mut stream = notifier.subscribe(SubscriptionKind::OrderId(id));
    assert_eq!(next_order(&mut stream).await?.status, OrderStatus::Created);

    fill(&*ex.store, id)?;
    let filled = next_order(&mut stream).await?;
    assert_eq!(filled.status, OrderStatus::Filled);
    assert_eq!(filled.initiator_atomic_swap.filled_amount, "100");

    let mut cfg = fast_watcher();
    cfg.fill_timeout = Duration::ZERO;
    Watcher::new(ex.store(), ex.chains(), cfg).poll_once().await?;
    assert_eq!(next_order(&mut stream).await?.status, OrderStatus::FailedSoft);

    assert!(next(&mut stream).await?.is_none(), "stream ends at a terminal status");
    wait_for("registry cleanup", Duration::from_secs(5), || {
        let n = notifier.subscriptions();
        async move { Ok((n == 0).then_some(())) }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn order_subscription_reports_confirmations() -> Result<()> {
    let ex = Exchange::new()?;
    let notifier = notifier(&ex, 8);
    let id = ex.filled_order(b"confirmations")?;
    let mut stream = notifier.subscribe(SubscriptionKind::OrderId(id));
    let order = next_order(&mut stream).await?;

    ex.initiate_initiator(&order).await?;
    let watcher = Watcher::new(ex.store(), ex.chains(), fast_watcher());
    watcher.poll_once().await?;
    ex.ledger.mine(Chain::BitcoinRegtest, 1);
    watcher.poll_once().await?;

    let update = next_order(&mut stream).await?;
    assert_eq!(update.status, OrderStatus::InitiatorAtomicSwapInitiated);
    assert_eq!(update.initiator_atomic_swap.current_confirmations, 1);
    Ok(())
}

#[tokio::test]
async fn missing_order_ends_the_subscription() -> Result<()> {
    let ex = Exchange::new()?;
    let notifier = notifier(&ex, 8);
    let mut stream = notifier.subscribe(SubscriptionKind::OrderId(404));
    assert!(next(&mut stream).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn cancelled_order_sends_a_final_update() -> Result<()> {
    let ex = Exchange::new()?;
    let notifier = notifier(&ex, 8);
    let id = ex.store.create_order(&new_order(b"cancel me"))?;

    let mut stream = notifier.subscribe(SubscriptionKind::OrderId(id));
    assert_eq!(next_order(&mut stream).await?.status, OrderStatus::Created);

    ex.store.cancel_order(MAKER, id)?;
    let last = next_order(&mut stream).await?;
    assert_eq!(last.id, id);
    assert_eq!(last.status, OrderStatus::Cancelled);
    assert!(next(&mut stream).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn address_subscription_sends_snapshot_then_deltas() -> Result<()> {
    let ex = Exchange::new()?;
    let notifier = notifier(&ex, 8);
    let first = ex.store.create_order(&new_order(b"first"))?;

    let mut stream = notifier.subscribe(SubscriptionKind::Address(MAKER.to_string()));
    let snapshot = next_orders(&mut stream).await?;
    assert_eq!(snapshot.iter().map(|o| o.id).collect::<Vec<_>>(), vec![first]);

    let second = ex.store.create_order(&new_order(b"second"))?;
    let delta = next_orders(&mut stream).await?;
    assert_eq!(delta.iter().map(|o| o.id).collect::<Vec<_>>(), vec![second]);

    fill(&*ex.store, first)?;
    let delta = next_orders(&mut stream).await?;
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].id, first);
    assert_eq!(delta[0].status, OrderStatus::Filled);
    Ok(())
}

#[tokio::test]
async fn pair_subscription_sends_each_created_order_once() -> Result<()> {
    let ex = Exchange::new()?;
    let notifier = notifier(&ex, 8);
    let a = ex.store.create_order(&new_order(b"a"))?;
    let b = ex.store.create_order(&new_order(b"b"))?;

    let mut stream = notifier.subscribe(SubscriptionKind::OrderPair(PAIR.to_string()));
    let initial = next_orders(&mut stream).await?;
    assert_eq!(initial.iter().map(|o| o.id).collect::<Vec<_>>(), vec![a, b]);

    fill(&*ex.store, a)?;
    let c = ex.store.create_order(&new_order(b"c"))?;
    let fresh = next_orders(&mut stream).await?;
    assert_eq!(fresh.iter().map(|o| o.id).collect::<Vec<_>>(), vec![c]);

    // Nothing else arrives.
    let quiet = tokio::time::timeout(Duration::from_millis(200), stream.next()).await;
    assert!(quiet.is_err(), "unexpected update: {quiet:?}");
    Ok(())
}

#[tokio::test]
async fn dropping_the_stream_deregisters_it() -> Result<()> {
    let ex = Exchange::new()?;
    let notifier = notifier(&ex, 8);

    let a = notifier.subscribe(SubscriptionKind::Address(MAKER.to_string()));
    let b = notifier.subscribe(SubscriptionKind::OrderPair(PAIR.to_string()));
    assert_ne!(a.id(), b.id());
    assert_eq!(notifier.subscriptions(), 2);

    drop(a);
    assert_eq!(notifier.subscriptions(), 1);
    drop(b);
    assert_eq!(notifier.subscriptions(), 0);
    Ok(())
}

#[tokio::test]
async fn slow_subscriber_is_disconnected() -> Result<()> {
    let ex = Exchange::new()?;
    let notifier = notifier(&ex, 1);
    let mut stream = notifier.subscribe(SubscriptionKind::Address(MAKER.to_string()));

    // The snapshot fills the queue; the next delta overflows it.
    wait_for("snapshot queued", Duration::from_secs(5), || {
        let queued = stream.pending() > 0;
        async move { Ok(queued.then_some(())) }
    })
    .await?;
    ex.store.create_order(&new_order(b"overflow"))?;

    wait_for("disconnect", Duration::from_secs(5), || {
        let n = notifier.subscriptions();
        async move { Ok((n == 0).then_some(())) }
    })
    .await?;
    assert!(matches!(next(&mut stream).await?, Some(Update::Orders(_))));
    assert!(next(&mut stream).await?.is_none());
    Ok(())
}
