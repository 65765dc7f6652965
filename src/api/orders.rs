use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use super::AppState;
use super::auth::Caller;
use super::error::ApiError;
use crate::order::store::{OrderFilter, blocking};
use crate::order::{Chain, NewOrder, Order, OrderError, OrderStatus};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    maker: Option<String>,
    taker: Option<String>,
    order_pair: Option<String>,
    secret_hash: Option<String>,
    status: Option<String>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    sort: Option<String>,
    page: Option<u32>,
    per_page: Option<u32>,
    /// Include both legs.
    verbose: bool,
}

impl ListQuery {
    fn into_filter(self) -> Result<(OrderFilter, bool), OrderError> {
        let status = self
            .status
            .map(|s| {
                OrderStatus::parse(&s)
                    .ok_or_else(|| OrderError::Validation(format!("unknown status: {s}")))
            })
            .transpose()?;
        let filter = OrderFilter {
            maker: self.maker,
            taker: self.taker,
            order_pair: self.order_pair,
            secret_hash: self.secret_hash,
            status,
            min_price: self.min_price,
            max_price: self.max_price,
            sort: self.sort,
            page: self.page,
            per_page: self.per_page,
        };
        Ok((filter, self.verbose))
    }
}

/// An order without its legs.
#[derive(Debug, Serialize)]
pub struct OrderSummary {
    id: i64,
    maker: String,
    taker: Option<String>,
    order_pair: String,
    secret_hash: String,
    secret: Option<String>,
    price: f64,
    status: OrderStatus,
    created_at: i64,
    updated_at: i64,
}

impl From<Order> for OrderSummary {
    fn from(o: Order) -> Self {
        Self {
            id: o.id,
            maker: o.maker,
            taker: o.taker,
            order_pair: o.order_pair,
            secret_hash: o.secret_hash,
            secret: o.secret,
            price: o.price,
            status: o.status,
            created_at: o.created_at,
            updated_at: o.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OrderView {
    Full(Order),
    Summary(OrderSummary),
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub send_address: String,
    pub receive_address: String,
    pub order_pair: String,
    pub send_amount: String,
    pub receive_amount: String,
    pub secret_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct FillOrderRequest {
    pub send_address: String,
    pub receive_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderIdResponse {
    pub order_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValueLockedResponse {
    pub chain: Chain,
    pub value_locked_usd: f64,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<OrderView>>, ApiError> {
    let (filter, verbose) = query.into_filter()?;
    let orders = blocking(&state.store, move |store| store.filter_orders(&filter)).await?;
    Ok(Json(
        orders
            .into_iter()
            .map(|o| {
                if verbose {
                    OrderView::Full(o)
                } else {
                    OrderView::Summary(o.into())
                }
            })
            .collect(),
    ))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> Result<Json<Order>, ApiError> {
    let order = blocking(&state.store, move |store| store.get_order(order_id))
        .await?
        .ok_or(OrderError::NotFound(order_id))?;
    Ok(Json(order))
}

pub async fn create_order(
    State(state): State<AppState>,
    Caller(creator): Caller,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderIdResponse>), ApiError> {
    let new = NewOrder {
        creator,
        send_address: req.send_address,
        receive_address: req.receive_address,
        order_pair: req.order_pair,
        send_amount: req.send_amount,
        receive_amount: req.receive_amount,
        secret_hash: req.secret_hash,
    };
    let order_id = blocking(&state.store, move |store| store.create_order(&new)).await?;
    Ok((StatusCode::CREATED, Json(OrderIdResponse { order_id })))
}

pub async fn fill_order(
    State(state): State<AppState>,
    Caller(filler): Caller,
    Path(order_id): Path<i64>,
    Json(req): Json<FillOrderRequest>,
) -> Result<Json<OrderIdResponse>, ApiError> {
    blocking(&state.store, move |store| {
        store.fill_order(order_id, &filler, &req.send_address, &req.receive_address)
    })
    .await?;
    Ok(Json(OrderIdResponse { order_id }))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Caller(creator): Caller,
    Path(order_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    blocking(&state.store, move |store| store.cancel_order(&creator, order_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn value_locked(
    State(state): State<AppState>,
    Path(chain): Path<String>,
) -> Result<Json<ValueLockedResponse>, ApiError> {
    let chain: Chain = chain.parse()?;
    let value_locked_usd = blocking(&state.store, move |store| store.value_locked(chain)).await?;
    Ok(Json(ValueLockedResponse {
        chain,
        value_locked_usd,
    }))
}
