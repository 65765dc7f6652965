//! Live order updates for subscribers.
//!
//! Each subscription is its own poll-and-diff task over the store, with its
//! own bounded queue. A subscriber that lets its queue fill up is
//! disconnected; it never slows down anyone else. Dropping the
//! [`SubscriptionStream`] stops the task.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use anyhow::Result;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::NotifierConfig;
use crate::order::store::{OrderFilter, OrderStore, blocking};
use crate::order::{Order, OrderError, OrderPair, OrderStatus, unix_now};

/// Upper bound on pages walked per pair poll.
const MAX_PAIR_PAGES: u32 = 50;
const PAIR_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionKind {
    OrderId(i64),
    Address(String),
    /// Canonical pair string.
    OrderPair(String),
}

impl SubscriptionKind {
    /// Parses a `subscribe::<target>` target: all digits is an order id,
    /// anything with both `-` and `:` is an order pair, the rest is an
    /// address.
    pub fn parse(target: &str) -> Result<Self, OrderError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(OrderError::Validation("empty subscription target".to_string()));
        }
        if target.bytes().all(|b| b.is_ascii_digit()) {
            let id = target
                .parse()
                .map_err(|_| OrderError::Validation(format!("order id out of range: {target}")))?;
            return Ok(SubscriptionKind::OrderId(id));
        }
        if target.contains('-') && target.contains(':') {
            let pair: OrderPair = target.parse()?;
            return Ok(SubscriptionKind::OrderPair(pair.canonical()));
        }
        if target.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(OrderError::Validation(format!("invalid address: {target}")));
        }
        Ok(SubscriptionKind::Address(target.to_string()))
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::OrderId(id) => write!(f, "order:{id}"),
            SubscriptionKind::Address(address) => write!(f, "address:{address}"),
            SubscriptionKind::OrderPair(pair) => write!(f, "pair:{pair}"),
        }
    }
}

/// What a subscriber receives. Serializes as `{"type": ..., "msg": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "msg", rename_all = "snake_case")]
pub enum Update {
    Order(Order),
    Orders(Vec<Order>),
}

type Registry = Arc<Mutex<HashMap<Uuid, SubscriptionKind>>>;

pub struct Notifier {
    store: Arc<dyn OrderStore>,
    cfg: NotifierConfig,
    registry: Registry,
}

impl Notifier {
    pub fn new(store: Arc<dyn OrderStore>, cfg: NotifierConfig) -> Self {
        Self {
            store,
            cfg,
            registry: Arc::default(),
        }
    }

    /// Starts a poll task for `kind`. Must be called inside a tokio runtime.
    pub fn subscribe(&self, kind: SubscriptionKind) -> SubscriptionStream {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.cfg.buffer.max(1));
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .insert(id, kind.clone());
        tracing::debug!(subscription = %id, %kind, "subscribed");

        tokio::spawn(poll_subscription(
            Arc::clone(&self.store),
            self.cfg.clone(),
            Arc::clone(&self.registry),
            id,
            kind,
            tx,
        ));

        SubscriptionStream {
            id,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn subscriptions(&self) -> usize {
        self.registry.lock().expect("registry mutex poisoned").len()
    }
}

pub struct SubscriptionStream {
    id: Uuid,
    rx: mpsc::Receiver<Update>,
    registry: Registry,
}

impl SubscriptionStream {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Updates queued but not yet received.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// `None` once the subscription has ended: terminal order, missing
    /// order, or disconnect on overflow.
    pub async fn recv(&mut self) -> Option<Update> {
        self.rx.recv().await
    }
}

impl Stream for SubscriptionStream {
    type Item = Update;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Update>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .remove(&self.id);
    }
}

/// Outcome of one poll of one subscription.
#[derive(Debug, PartialEq)]
enum Step {
    Idle,
    Emit(Update),
    EmitAndFinish(Update),
    Finish,
}

/// Per-subscription diff state.
enum Tracker {
    Order { last: Option<Order> },
    Address { first: bool, seen: HashMap<i64, Order> },
    Pair { sent: HashSet<i64> },
}

impl Tracker {
    fn new(kind: &SubscriptionKind) -> Self {
        match kind {
            SubscriptionKind::OrderId(_) => Tracker::Order { last: None },
            SubscriptionKind::Address(_) => Tracker::Address {
                first: true,
                seen: HashMap::new(),
            },
            SubscriptionKind::OrderPair(_) => Tracker::Pair {
                sent: HashSet::new(),
            },
        }
    }

    fn order(&mut self, current: Option<Order>) -> Step {
        let Tracker::Order { last } = self else {
            return Step::Idle;
        };
        let Some(current) = current else {
            // Cancelled orders are soft-deleted and no longer readable.
            return match last.take() {
                Some(mut prev) if !prev.status.is_terminal() => {
                    prev.status = OrderStatus::Cancelled;
                    prev.updated_at = unix_now();
                    Step::EmitAndFinish(Update::Order(prev))
                }
                _ => Step::Finish,
            };
        };
        let changed = last.as_ref().is_none_or(|prev| prev.is_different(&current));
        let terminal = current.status.is_terminal();
        *last = Some(current.clone());
        match (changed, terminal) {
            (true, true) => Step::EmitAndFinish(Update::Order(current)),
            (true, false) => Step::Emit(Update::Order(current)),
            (false, true) => Step::Finish,
            (false, false) => Step::Idle,
        }
    }

    fn address(&mut self, orders: Vec<Order>) -> Step {
        let Tracker::Address { first, seen } = self else {
            return Step::Idle;
        };
        let mut delta = Vec::new();
        for order in orders {
            let changed = seen
                .get(&order.id)
                .is_none_or(|prev| prev.is_different(&order));
            if changed {
                seen.insert(order.id, order.clone());
                delta.push(order);
            }
        }
        if std::mem::take(first) || !delta.is_empty() {
            Step::Emit(Update::Orders(delta))
        } else {
            Step::Idle
        }
    }

    fn pair(&mut self, orders: Vec<Order>) -> Step {
        let Tracker::Pair { sent } = self else {
            return Step::Idle;
        };
        let fresh: Vec<Order> = orders
            .into_iter()
            .filter(|o| o.status == OrderStatus::Created && sent.insert(o.id))
            .collect();
        if fresh.is_empty() {
            Step::Idle
        } else {
            Step::Emit(Update::Orders(fresh))
        }
    }
}

async fn poll_subscription(
    store: Arc<dyn OrderStore>,
    cfg: NotifierConfig,
    registry: Registry,
    id: Uuid,
    kind: SubscriptionKind,
    tx: mpsc::Sender<Update>,
) {
    let mut tracker = Tracker::new(&kind);
    loop {
        match poll_step(&store, &kind, &mut tracker).await {
            Ok(step) => {
                let (update, finish) = match step {
                    Step::Idle => (None, false),
                    Step::Emit(update) => (Some(update), false),
                    Step::EmitAndFinish(update) => (Some(update), true),
                    Step::Finish => (None, true),
                };
                if let Some(update) = update {
                    match tx.try_send(update) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!(subscription = %id, %kind, "subscriber queue full, disconnecting");
                            break;
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
                if finish {
                    tracing::debug!(subscription = %id, %kind, "subscription finished");
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(subscription = %id, %kind, error = %format!("{err:#}"), "subscription poll failed");
            }
        }

        tokio::select! {
            _ = tx.closed() => break,
            _ = tokio::time::sleep(cfg.poll_interval) => {}
        }
    }

    registry
        .lock()
        .expect("registry mutex poisoned")
        .remove(&id);
}

async fn poll_step(
    store: &Arc<dyn OrderStore>,
    kind: &SubscriptionKind,
    tracker: &mut Tracker,
) -> Result<Step> {
    Ok(match kind {
        SubscriptionKind::OrderId(order_id) => {
            let order_id = *order_id;
            let current = blocking(store, move |s| s.get_order(order_id)).await?;
            tracker.order(current)
        }
        SubscriptionKind::Address(address) => {
            let address = address.clone();
            let orders = blocking(store, move |s| s.get_orders_by_address(&address)).await?;
            tracker.address(orders)
        }
        SubscriptionKind::OrderPair(pair) => {
            let pair = pair.clone();
            let orders = blocking(store, move |s| created_orders(s, &pair)).await?;
            tracker.pair(orders)
        }
    })
}

fn created_orders(store: &dyn OrderStore, pair: &str) -> Result<Vec<Order>> {
    let (orders, truncated) = walk_pages(MAX_PAIR_PAGES, PAIR_PAGE_SIZE, |page| {
        store.filter_orders(&OrderFilter {
            order_pair: Some(pair.to_string()),
            status: Some(OrderStatus::Created),
            sort: Some("id".to_string()),
            page: Some(page),
            per_page: Some(PAIR_PAGE_SIZE),
            ..Default::default()
        })
    })?;
    if truncated {
        tracing::warn!(
            pair,
            limit = MAX_PAIR_PAGES * PAIR_PAGE_SIZE,
            "pair poll hit the page cap, newer orders are not sent"
        );
    }
    Ok(orders)
}

/// Collects pages until a short one. The flag is set when `max_pages`
/// full pages were read and more may remain.
fn walk_pages<F>(max_pages: u32, page_size: u32, mut fetch: F) -> Result<(Vec<Order>, bool)>
where
    F: FnMut(u32) -> Result<Vec<Order>>,
{
    let mut out = Vec::new();
    for page in 1..=max_pages {
        let batch = fetch(page)?;
        let done = batch.len() < page_size as usize;
        out.extend(batch);
        if done {
            return Ok((out, false));
        }
    }
    Ok((out, true))
}
