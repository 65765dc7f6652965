mod support;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt as _;

use htlc_orderbook::api::auth::TokenTable;
use htlc_orderbook::api::{AppState, router};
use htlc_orderbook::chain::sha256_hex;
use htlc_orderbook::config::NotifierConfig;
use htlc_orderbook::notifier::Notifier;

use support::fixtures::{Exchange, MAKER, PAIR, TAKER, btc_address, eth_address};

const MAKER_TOKEN: &str = "maker-token";
const TAKER_TOKEN: &str = "taker-token";

fn app(ex: &Exchange) -> Router {
    let mut tokens = TokenTable::default();
    tokens.insert(MAKER_TOKEN, MAKER);
    tokens.insert(TAKER_TOKEN, TAKER);
    router(AppState {
        store: ex.store(),
        notifier: Arc::new(Notifier::new(ex.store(), NotifierConfig::default())),
        auth: Arc::new(tokens),
    })
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => req.body(Body::empty())?,
    };
    let resp = app.clone().oneshot(req).await.context("call router")?;
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .context("read body")?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).context("decode body")?
    };
    Ok((status, value))
}

fn create_body(secret: &[u8]) -> Value {
    json!({
        "send_address": btc_address(1),
        "receive_address": eth_address(0xaa),
        "order_pair": PAIR,
        "send_amount": "100",
        "receive_amount": "200",
        "secret_hash": sha256_hex(secret),
    })
}

fn fill_body() -> Value {
    json!({
        "send_address": eth_address(0xbb),
        "receive_address": btc_address(2),
    })
}

async fn create(app: &Router, secret: &[u8]) -> Result<i64> {
    let (status, body) = call(app, "POST", "/orders", Some(MAKER_TOKEN), Some(create_body(secret))).await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["order_id"].as_i64().context("order_id missing")
}

#[tokio::test]
async fn health_is_public() -> Result<()> {
    let ex = Exchange::new()?;
    let (status, body) = call(&app(&ex), "GET", "/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
    Ok(())
}

#[tokio::test]
async fn writes_require_a_known_bearer_token() -> Result<()> {
    let ex = Exchange::new()?;
    let app = app(&ex);

    let (status, body) = call(&app, "POST", "/orders", None, Some(create_body(b"a"))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = call(&app, "POST", "/orders", Some("stolen"), Some(create_body(b"a"))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&app, "GET", "/orders", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
    Ok(())
}

#[tokio::test]
async fn create_fill_and_read_back() -> Result<()> {
    let ex = Exchange::new()?;
    let app = app(&ex);
    let id = create(&app, b"route secret").await?;

    let (status, order) = call(&app, "GET", &format!("/orders/{id}"), None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["maker"], MAKER);
    assert_eq!(order["status"], "created");
    assert_eq!(order["initiator_atomic_swap"]["chain"], "bitcoin_regtest");

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/orders/{id}"),
        Some(TAKER_TOKEN),
        Some(fill_body()),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"order_id": id}));

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/orders/{id}"),
        Some(TAKER_TOKEN),
        Some(fill_body()),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = call(&app, "DELETE", &format!("/orders/{id}"), Some(MAKER_TOKEN), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, list) = call(&app, "GET", "/orders?status=filled", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().context("list is an array")?;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["taker"], TAKER);
    assert!(list[0].get("initiator_atomic_swap").is_none());

    let (_, list) = call(&app, "GET", "/orders?status=filled&verbose=true", None, None).await?;
    assert_eq!(list[0]["follower_atomic_swap"]["chain"], "ethereum_localnet");

    let (_, list) = call(&app, "GET", &format!("/orders?maker={TAKER}"), None, None).await?;
    assert_eq!(list, json!([]));
    Ok(())
}

#[tokio::test]
async fn only_the_maker_cancels() -> Result<()> {
    let ex = Exchange::new()?;
    let app = app(&ex);
    let id = create(&app, b"cancel me").await?;

    let (status, _) = call(&app, "DELETE", &format!("/orders/{id}"), Some(TAKER_TOKEN), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&app, "DELETE", &format!("/orders/{id}"), Some(MAKER_TOKEN), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = call(&app, "GET", &format!("/orders/{id}"), None, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn bad_input_maps_to_client_errors() -> Result<()> {
    let ex = Exchange::new()?;
    let app = app(&ex);

    let (status, body) = call(&app, "GET", "/orders/999", None, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let mut bad_pair = create_body(b"bad pair");
    bad_pair["order_pair"] = json!("dogecoin-ethereum_localnet");
    let (status, body) = call(&app, "POST", "/orders", Some(MAKER_TOKEN), Some(bad_pair)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let mut bad_hash = create_body(b"bad hash");
    bad_hash["secret_hash"] = json!("xyz");
    let (status, _) = call(&app, "POST", "/orders", Some(MAKER_TOKEN), Some(bad_hash)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "GET", "/orders?status=lost", None, None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, "GET", "/value-locked/dogecoin", None, None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn reports_value_locked_per_chain() -> Result<()> {
    let ex = Exchange::new()?;
    let app = app(&ex);
    create(&app, b"locked").await?;

    let (status, body) = call(&app, "GET", "/value-locked/bitcoin_regtest", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chain"], "bitcoin_regtest");
    assert_eq!(body["value_locked_usd"], json!(0.0));
    Ok(())
}
