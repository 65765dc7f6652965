use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension as _, Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};

use super::{
    Asset, AtomicSwap, Chain, NewOrder, Order, OrderError, OrderPair, OrderStatus, SwapStatus,
    parse_amount, unix_now, validate_secret_hash,
};
use crate::config::ExchangeConfig;

const DEFAULT_PER_PAGE: u32 = 10;
const MAX_PER_PAGE: u32 = 100;

/// Query of `OrderStore::filter_orders`. Every field is optional; unset
/// fields do not constrain the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_pair: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    /// `id`, `-id`, `price` or `-price`. Defaults to newest first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    /// 1-based.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

/// Persistence of orders and their two legs. Multi-row writes are atomic.
pub trait OrderStore: Send + Sync {
    fn create_order(&self, new: &NewOrder) -> Result<i64>;

    /// Fails with a conflict unless the order is still `Created`.
    fn fill_order(
        &self,
        order_id: i64,
        filler: &str,
        send_address: &str,
        receive_address: &str,
    ) -> Result<()>;

    /// Only the maker may cancel, and only before the fill.
    fn cancel_order(&self, creator: &str, order_id: i64) -> Result<()>;

    fn get_order(&self, order_id: i64) -> Result<Option<Order>>;

    fn filter_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>>;

    fn get_active_orders(&self) -> Result<Vec<Order>>;

    /// Persists the order row and both legs together.
    fn update_order(&self, order: &Order) -> Result<()>;

    fn get_orders_by_address(&self, address: &str) -> Result<Vec<Order>>;

    fn set_price(&self, chain: Chain, asset: &Asset, price: f64) -> Result<()>;

    fn price(&self, chain: Chain, asset: &Asset) -> Result<Option<f64>>;

    /// USD value currently locked in HTLCs on `chain` by active orders.
    fn value_locked(&self, chain: Chain) -> Result<f64>;
}

/// Runs a synchronous store call on the blocking pool.
pub async fn blocking<T, F>(store: &Arc<dyn OrderStore>, f: F) -> Result<T>
where
    F: FnOnce(&dyn OrderStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .context("join store task")?
}

#[derive(Debug)]
pub struct SqliteOrderStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    config: ExchangeConfig,
}

impl SqliteOrderStore {
    pub fn open(path: PathBuf, config: ExchangeConfig) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create order store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    fn query_orders(&self, where_sql: &str, tail_sql: &str, args: Vec<Value>) -> Result<Vec<Order>> {
        let sql = format!("{SELECT_ORDERS} WHERE o.deleted_at IS NULL {where_sql} {tail_sql}");
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(&sql).context("prepare order query")?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), order_from_row)
            .context("query orders")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read order row")?);
        }
        Ok(out)
    }
}

impl OrderStore for SqliteOrderStore {
    fn create_order(&self, new: &NewOrder) -> Result<i64> {
        let pair: OrderPair = new.order_pair.parse()?;
        validate_secret_hash(&new.secret_hash)?;
        let secret_hash = new.secret_hash.to_ascii_lowercase();

        let send_amount = parse_amount("send_amount", &new.send_amount)?;
        let receive_amount = parse_amount("receive_amount", &new.receive_amount)?;
        let send_cfg = self.config.require_asset(pair.send.chain, &pair.send.asset)?;
        let receive_cfg = self
            .config
            .require_asset(pair.receive.chain, &pair.receive.asset)?;
        send_cfg.check_amount("send_amount", send_amount)?;
        receive_cfg.check_amount("receive_amount", receive_amount)?;

        pair.send.chain.validate_address(&new.send_address)?;
        pair.receive.chain.validate_address(&new.receive_address)?;

        let price = send_amount as f64 / receive_amount as f64;

        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin create order")?;

        let send_price = stored_price(&tx, pair.send.chain, &pair.send.asset)?;
        let receive_price =
            stored_price(&tx, pair.receive.chain, &pair.receive.asset)?.unwrap_or(0.0);

        if let Some(max_usd) = self.config.max_order_value_usd {
            // Without a price the limit cannot be enforced.
            let price = send_price.ok_or_else(|| {
                OrderError::Validation(format!("no price for {}", pair.send))
            })?;
            let value = send_cfg.to_units(send_amount) * price;
            if value > max_usd {
                return Err(OrderError::Validation(format!(
                    "order value {value:.2} USD exceeds limit {max_usd:.2} USD"
                ))
                .into());
            }
        }
        let send_price = send_price.unwrap_or(0.0);

        let taken: Option<i64> = tx
            .query_row(
                "SELECT id FROM orders WHERE secret_hash = ?1",
                params![&secret_hash],
                |row| row.get(0),
            )
            .optional()
            .context("check secret_hash")?;
        if taken.is_some() {
            return Err(OrderError::Conflict(format!("secret_hash already used: {secret_hash}")).into());
        }

        let initiator_id = insert_leg(
            &tx,
            pair.send.chain,
            &pair.send.asset,
            &new.send_amount,
            &new.send_address,
            "",
            send_cfg.min_confirmations,
            send_price,
        )
        .context("insert initiator atomic swap")?;
        let follower_id = insert_leg(
            &tx,
            pair.receive.chain,
            &pair.receive.asset,
            &new.receive_amount,
            "",
            &new.receive_address,
            receive_cfg.min_confirmations,
            receive_price,
        )
        .context("insert follower atomic swap")?;

        let now = unix_now();
        tx.execute(
            r#"
INSERT INTO orders (
  maker,
  order_pair,
  secret_hash,
  price,
  status,
  initiator_atomic_swap_id,
  follower_atomic_swap_id,
  created_at,
  updated_at
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8
)
"#,
            params![
                &new.creator,
                pair.canonical(),
                &secret_hash,
                price,
                OrderStatus::Created.as_str(),
                initiator_id,
                follower_id,
                now,
            ],
        )
        .context("insert order")?;
        let order_id = tx.last_insert_rowid();

        tx.commit().context("commit create order")?;
        tracing::info!(order_id, maker = %new.creator, pair = %pair, "order created");
        Ok(order_id)
    }

    fn fill_order(
        &self,
        order_id: i64,
        filler: &str,
        send_address: &str,
        receive_address: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin fill order")?;

        let head = order_head(&tx, order_id)?.ok_or(OrderError::NotFound(order_id))?;
        if head.status != OrderStatus::Created {
            return Err(OrderError::Conflict(format!(
                "order {order_id} cannot be filled in status {}",
                head.status
            ))
            .into());
        }
        if head.maker.eq_ignore_ascii_case(filler) {
            return Err(OrderError::Conflict(format!(
                "maker cannot fill own order {order_id}"
            ))
            .into());
        }

        let pair: OrderPair = head.order_pair.parse()?;
        // The taker sends on the follower chain and receives on the initiator chain.
        pair.receive.chain.validate_address(send_address)?;
        pair.send.chain.validate_address(receive_address)?;
        let send_cfg = self.config.require_asset(pair.send.chain, &pair.send.asset)?;
        let receive_cfg = self
            .config
            .require_asset(pair.receive.chain, &pair.receive.asset)?;

        tx.execute(
            "UPDATE atomic_swaps SET redeemer_address = ?2, timelock = ?3, filled_amount = amount WHERE id = ?1",
            params![head.initiator_id, receive_address, send_cfg.initiator_timelock],
        )
        .context("fill initiator atomic swap")?;
        tx.execute(
            "UPDATE atomic_swaps SET initiator_address = ?2, timelock = ?3, filled_amount = amount WHERE id = ?1",
            params![head.follower_id, send_address, receive_cfg.follower_timelock],
        )
        .context("fill follower atomic swap")?;
        let rows = tx
            .execute(
                "UPDATE orders SET taker = ?2, status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?5",
                params![
                    order_id,
                    filler,
                    OrderStatus::Filled.as_str(),
                    unix_now(),
                    OrderStatus::Created.as_str(),
                ],
            )
            .with_context(|| format!("fill order {order_id}"))?;
        if rows != 1 {
            return Err(OrderError::Conflict(format!("order {order_id} already filled")).into());
        }

        tx.commit().context("commit fill order")?;
        tracing::info!(order_id, taker = %filler, "order filled");
        Ok(())
    }

    fn cancel_order(&self, creator: &str, order_id: i64) -> Result<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin cancel order")?;

        let head = order_head(&tx, order_id)?.ok_or(OrderError::NotFound(order_id))?;
        if !head.maker.eq_ignore_ascii_case(creator) {
            return Err(OrderError::Unauthorized(format!(
                "order {order_id} is not owned by {creator}"
            ))
            .into());
        }
        if head.status != OrderStatus::Created {
            return Err(OrderError::Conflict(format!(
                "order {order_id} cannot be cancelled in status {}",
                head.status
            ))
            .into());
        }

        let now = unix_now();
        tx.execute(
            "UPDATE orders SET status = ?2, updated_at = ?3, deleted_at = ?3 WHERE id = ?1",
            params![order_id, OrderStatus::Cancelled.as_str(), now],
        )
        .with_context(|| format!("cancel order {order_id}"))?;

        tx.commit().context("commit cancel order")?;
        tracing::info!(order_id, maker = %creator, "order cancelled");
        Ok(())
    }

    fn get_order(&self, order_id: i64) -> Result<Option<Order>> {
        let mut orders = self
            .query_orders("AND o.id = ?1", "", vec![Value::Integer(order_id)])
            .with_context(|| format!("get order {order_id}"))?;
        Ok(orders.pop())
    }

    fn filter_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut clauses = String::new();
        let mut args = Vec::new();
        let mut bind = |clause: &str, value: Value, clauses: &mut String| {
            args.push(value);
            clauses.push_str(&clause.replace('?', &format!("?{}", args.len())));
        };

        if let Some(maker) = &filter.maker {
            bind(" AND lower(o.maker) = lower(?)", Value::Text(maker.clone()), &mut clauses);
        }
        if let Some(taker) = &filter.taker {
            bind(" AND lower(o.taker) = lower(?)", Value::Text(taker.clone()), &mut clauses);
        }
        if let Some(order_pair) = &filter.order_pair {
            let pair: OrderPair = order_pair.parse()?;
            bind(" AND o.order_pair = ?", Value::Text(pair.canonical()), &mut clauses);
        }
        if let Some(secret_hash) = &filter.secret_hash {
            bind(
                " AND o.secret_hash = ?",
                Value::Text(secret_hash.to_ascii_lowercase()),
                &mut clauses,
            );
        }
        if let Some(status) = filter.status {
            bind(" AND o.status = ?", Value::Text(status.as_str().to_string()), &mut clauses);
        }
        if let Some(min_price) = filter.min_price {
            bind(" AND o.price >= ?", Value::Real(min_price), &mut clauses);
        }
        if let Some(max_price) = filter.max_price {
            bind(" AND o.price <= ?", Value::Real(max_price), &mut clauses);
        }

        let order_by = match filter.sort.as_deref().unwrap_or("-id") {
            "id" => "o.id ASC",
            "-id" => "o.id DESC",
            "price" => "o.price ASC, o.id ASC",
            "-price" => "o.price DESC, o.id ASC",
            other => {
                return Err(OrderError::Validation(format!("unknown sort: {other}")).into());
            }
        };
        let page = filter.page.unwrap_or(1);
        if page == 0 {
            return Err(OrderError::Validation("page is 1-based".to_string()).into());
        }
        let per_page = filter
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let offset = i64::from(page - 1) * i64::from(per_page);

        self.query_orders(
            &clauses,
            &format!("ORDER BY {order_by} LIMIT {per_page} OFFSET {offset}"),
            args,
        )
        .context("filter orders")
    }

    fn get_active_orders(&self) -> Result<Vec<Order>> {
        let active: Vec<Value> = OrderStatus::ALL
            .into_iter()
            .filter(|s| s.is_active())
            .map(|s| Value::Text(s.as_str().to_string()))
            .collect();
        let placeholders = (1..=active.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.query_orders(
            &format!("AND o.status IN ({placeholders})"),
            "ORDER BY o.id ASC",
            active,
        )
        .context("get active orders")
    }

    fn update_order(&self, order: &Order) -> Result<()> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin update order")?;

        let head = order_head(&tx, order.id)?.ok_or(OrderError::NotFound(order.id))?;
        if !head.status.can_advance_to(order.status) {
            return Err(OrderError::Conflict(format!(
                "order {} cannot move from {} to {}",
                order.id, head.status, order.status
            ))
            .into());
        }
        if head.initiator_id != order.initiator_atomic_swap.id
            || head.follower_id != order.follower_atomic_swap.id
        {
            return Err(OrderError::Conflict(format!(
                "order {} legs do not match the stored order",
                order.id
            ))
            .into());
        }

        update_leg(&tx, &order.initiator_atomic_swap).context("update initiator atomic swap")?;
        update_leg(&tx, &order.follower_atomic_swap).context("update follower atomic swap")?;

        tx.execute(
            "UPDATE orders SET status = ?2, secret = COALESCE(secret, ?3), updated_at = ?4 WHERE id = ?1",
            params![order.id, order.status.as_str(), &order.secret, order.updated_at],
        )
        .with_context(|| format!("update order {}", order.id))?;

        tx.commit().context("commit update order")?;
        Ok(())
    }

    fn get_orders_by_address(&self, address: &str) -> Result<Vec<Order>> {
        self.query_orders(
            "AND (lower(o.maker) = lower(?1) OR lower(o.taker) = lower(?1))",
            "ORDER BY o.id ASC",
            vec![Value::Text(address.to_string())],
        )
        .with_context(|| format!("get orders of {address}"))
    }

    fn set_price(&self, chain: Chain, asset: &Asset, price: f64) -> Result<()> {
        self.conn
            .lock()
            .expect("store mutex poisoned")
            .execute(
                r#"
INSERT INTO prices (chain, asset, price, updated_at) VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(chain, asset) DO UPDATE SET price = excluded.price, updated_at = excluded.updated_at
"#,
                params![chain.as_str(), asset.to_string(), price, unix_now()],
            )
            .with_context(|| format!("set price {chain}:{asset}"))?;
        Ok(())
    }

    fn price(&self, chain: Chain, asset: &Asset) -> Result<Option<f64>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        stored_price(&conn, chain, asset)
    }

    fn value_locked(&self, chain: Chain) -> Result<f64> {
        let active: Vec<String> = OrderStatus::ALL
            .into_iter()
            .filter(|s| s.is_active())
            .map(|s| format!("'{}'", s.as_str()))
            .collect();
        let sql = format!(
            r#"
SELECT s.asset, s.amount, s.price_by_oracle
FROM atomic_swaps s
JOIN orders o ON s.id = o.initiator_atomic_swap_id OR s.id = o.follower_atomic_swap_id
WHERE o.deleted_at IS NULL
  AND o.status IN ({})
  AND s.chain = ?1
  AND s.status IN ('{}', '{}')
"#,
            active.join(", "),
            SwapStatus::Detected.as_str(),
            SwapStatus::Initiated.as_str(),
        );

        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(&sql).context("prepare value locked")?;
        let rows = stmt
            .query_map(params![chain.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })
            .context("query value locked")?;

        let mut total = 0.0;
        for row in rows {
            let (asset, amount, price) = row.context("read value locked row")?;
            let asset = Asset::parse_for(chain, &asset)?;
            let Some(cfg) = self.config.asset(chain, &asset) else {
                tracing::warn!(%chain, %asset, "value locked: asset not configured");
                continue;
            };
            let amount: u128 = amount
                .parse()
                .with_context(|| format!("parse locked amount {amount}"))?;
            total += cfg.to_units(amount) * price;
        }
        Ok(total)
    }
}

struct OrderHead {
    maker: String,
    order_pair: String,
    status: OrderStatus,
    initiator_id: i64,
    follower_id: i64,
}

fn order_head(conn: &Connection, order_id: i64) -> Result<Option<OrderHead>> {
    conn.query_row(
        r#"
SELECT maker, order_pair, status, initiator_atomic_swap_id, follower_atomic_swap_id
FROM orders
WHERE id = ?1 AND deleted_at IS NULL
"#,
        params![order_id],
        |row| {
            let status: String = row.get(2)?;
            Ok(OrderHead {
                maker: row.get(0)?,
                order_pair: row.get(1)?,
                status: order_status_from_str(&status, 2)?,
                initiator_id: row.get(3)?,
                follower_id: row.get(4)?,
            })
        },
    )
    .optional()
    .with_context(|| format!("load order {order_id}"))
}

fn stored_price(conn: &Connection, chain: Chain, asset: &Asset) -> Result<Option<f64>> {
    conn.query_row(
        "SELECT price FROM prices WHERE chain = ?1 AND asset = ?2",
        params![chain.as_str(), asset.to_string()],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("get price {chain}:{asset}"))
}

#[allow(clippy::too_many_arguments)]
fn insert_leg(
    conn: &Connection,
    chain: Chain,
    asset: &Asset,
    amount: &str,
    initiator_address: &str,
    redeemer_address: &str,
    minimum_confirmations: u64,
    price_by_oracle: f64,
) -> Result<i64> {
    conn.execute(
        r#"
INSERT INTO atomic_swaps (
  chain,
  asset,
  amount,
  filled_amount,
  initiator_address,
  redeemer_address,
  timelock,
  status,
  current_confirmations,
  minimum_confirmations,
  price_by_oracle
) VALUES (
  ?1, ?2, ?3, '0', ?4, ?5, 0, ?6, 0, ?7, ?8
)
"#,
        params![
            chain.as_str(),
            asset.to_string(),
            amount,
            initiator_address,
            redeemer_address,
            SwapStatus::NotStarted.as_str(),
            minimum_confirmations,
            price_by_oracle,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Tx hashes are write-once: a stored hash is never replaced.
fn update_leg(conn: &Connection, leg: &AtomicSwap) -> Result<()> {
    let stored: String = conn
        .query_row(
            "SELECT status FROM atomic_swaps WHERE id = ?1",
            params![leg.id],
            |row| row.get(0),
        )
        .with_context(|| format!("load atomic swap {}", leg.id))?;
    let stored = SwapStatus::parse(&stored)
        .with_context(|| format!("unknown atomic swap status: {stored}"))?;
    if leg.status.rank() < stored.rank() {
        return Err(OrderError::Conflict(format!(
            "atomic swap {} cannot move from {} to {}",
            leg.id,
            stored.as_str(),
            leg.status.as_str()
        ))
        .into());
    }

    conn.execute(
        r#"
UPDATE atomic_swaps SET
  status = ?2,
  filled_amount = ?3,
  current_confirmations = ?4,
  initiate_tx_hash = COALESCE(initiate_tx_hash, ?5),
  redeem_tx_hash = COALESCE(redeem_tx_hash, ?6),
  refund_tx_hash = COALESCE(refund_tx_hash, ?7)
WHERE id = ?1
"#,
        params![
            leg.id,
            leg.status.as_str(),
            &leg.filled_amount,
            leg.current_confirmations,
            &leg.initiate_tx_hash,
            &leg.redeem_tx_hash,
            &leg.refund_tx_hash,
        ],
    )
    .with_context(|| format!("update atomic swap {}", leg.id))?;
    Ok(())
}

const SWAP_COLUMNS: usize = 15;

const SELECT_ORDERS: &str = r#"
SELECT
  o.id,
  o.maker,
  o.taker,
  o.order_pair,
  o.secret_hash,
  o.secret,
  o.price,
  o.status,
  o.created_at,
  o.updated_at,
  i.id, i.chain, i.asset, i.amount, i.filled_amount, i.initiator_address, i.redeemer_address,
  i.timelock, i.status, i.initiate_tx_hash, i.redeem_tx_hash, i.refund_tx_hash,
  i.current_confirmations, i.minimum_confirmations, i.price_by_oracle,
  f.id, f.chain, f.asset, f.amount, f.filled_amount, f.initiator_address, f.redeemer_address,
  f.timelock, f.status, f.initiate_tx_hash, f.redeem_tx_hash, f.refund_tx_hash,
  f.current_confirmations, f.minimum_confirmations, f.price_by_oracle
FROM orders o
JOIN atomic_swaps i ON i.id = o.initiator_atomic_swap_id
JOIN atomic_swaps f ON f.id = o.follower_atomic_swap_id
"#;

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    let status: String = row.get(7)?;
    Ok(Order {
        id: row.get(0)?,
        maker: row.get(1)?,
        taker: row.get(2)?,
        order_pair: row.get(3)?,
        secret_hash: row.get(4)?,
        secret: row.get(5)?,
        price: row.get(6)?,
        status: order_status_from_str(&status, 7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        initiator_atomic_swap: swap_from_row(row, 10)?,
        follower_atomic_swap: swap_from_row(row, 10 + SWAP_COLUMNS)?,
    })
}

fn swap_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<AtomicSwap> {
    let chain_str: String = row.get(base + 1)?;
    let chain: Chain = chain_str
        .parse()
        .map_err(|e: OrderError| conversion_error(base + 1, rusqlite::types::Type::Text, e.to_string()))?;
    let asset_str: String = row.get(base + 2)?;
    let asset = Asset::parse_for(chain, &asset_str)
        .map_err(|e| conversion_error(base + 2, rusqlite::types::Type::Text, e.to_string()))?;
    let status_str: String = row.get(base + 8)?;
    let status = SwapStatus::parse(&status_str).ok_or_else(|| {
        conversion_error(
            base + 8,
            rusqlite::types::Type::Text,
            format!("unknown atomic swap status: {status_str}"),
        )
    })?;

    Ok(AtomicSwap {
        id: row.get(base)?,
        chain,
        asset,
        amount: row.get(base + 3)?,
        filled_amount: row.get(base + 4)?,
        initiator_address: row.get(base + 5)?,
        redeemer_address: row.get(base + 6)?,
        timelock: u64_column(row, base + 7, "timelock")?,
        status,
        initiate_tx_hash: row.get(base + 9)?,
        redeem_tx_hash: row.get(base + 10)?,
        refund_tx_hash: row.get(base + 11)?,
        current_confirmations: u64_column(row, base + 12, "current_confirmations")?,
        minimum_confirmations: u64_column(row, base + 13, "minimum_confirmations")?,
        price_by_oracle: row.get(base + 14)?,
    })
}

fn u64_column(row: &Row<'_>, idx: usize, name: &str) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| {
        conversion_error(
            idx,
            rusqlite::types::Type::Integer,
            format!("invalid {name} {value}"),
        )
    })
}

fn conversion_error(idx: usize, ty: rusqlite::types::Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn order_status_from_str(s: &str, col: usize) -> rusqlite::Result<OrderStatus> {
    OrderStatus::parse(s).ok_or_else(|| {
        conversion_error(
            col,
            rusqlite::types::Type::Text,
            format!("unknown order status: {s}"),
        )
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS atomic_swaps (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  chain TEXT NOT NULL,
  asset TEXT NOT NULL,
  amount TEXT NOT NULL,
  filled_amount TEXT NOT NULL,
  initiator_address TEXT NOT NULL,
  redeemer_address TEXT NOT NULL,
  timelock INTEGER NOT NULL,
  status TEXT NOT NULL,
  initiate_tx_hash TEXT,
  redeem_tx_hash TEXT,
  refund_tx_hash TEXT,
  current_confirmations INTEGER NOT NULL,
  minimum_confirmations INTEGER NOT NULL,
  price_by_oracle REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS orders (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  maker TEXT NOT NULL,
  taker TEXT,
  order_pair TEXT NOT NULL,
  secret_hash TEXT NOT NULL UNIQUE,
  secret TEXT,
  price REAL NOT NULL,
  status TEXT NOT NULL,
  initiator_atomic_swap_id INTEGER NOT NULL REFERENCES atomic_swaps(id),
  follower_atomic_swap_id INTEGER NOT NULL REFERENCES atomic_swaps(id),
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  deleted_at INTEGER
);
CREATE INDEX IF NOT EXISTS orders_status_idx ON orders(status);
CREATE INDEX IF NOT EXISTS orders_maker_idx ON orders(maker);
CREATE INDEX IF NOT EXISTS orders_taker_idx ON orders(taker);
CREATE INDEX IF NOT EXISTS orders_pair_idx ON orders(order_pair);
CREATE TABLE IF NOT EXISTS prices (
  chain TEXT NOT NULL,
  asset TEXT NOT NULL,
  price REAL NOT NULL,
  updated_at INTEGER NOT NULL,
  PRIMARY KEY (chain, asset)
);
"#,
    )
    .context("create tables")?;
    Ok(())
}
