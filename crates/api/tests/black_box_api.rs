use chrono::{Duration as ChronoDuration, Utc};
use consult_api::ApiConfig;
use consult_auth::{JwtClaims, Role};
use consult_core::UserId;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod (in-memory stores), bound to an ephemeral port.
        let app = consult_api::app::build_app(&ApiConfig::in_memory(SECRET))
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn balance(&self, token: &str) -> f64 {
        let (status, body) = self.get(token, "/wallet").await;
        assert_eq!(status, StatusCode::OK);
        body["data"]["balance"].as_f64().unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(user: &str, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: UserId::parse(user).unwrap(),
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn bank_details() -> Value {
    json!({
        "account_holder": "Test User",
        "account_number": "12345678",
        "bank_name": "Test Bank",
    })
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = srv
        .client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .get(format!("{}/wallet", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth("garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn whoami_reflects_token() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt("fin-1", vec![Role::finance()]);

    let (status, body) = srv.get(&token, "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], "fin-1");
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "finance"));
    assert!(
        body["permissions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "wallet.settle")
    );
}

#[tokio::test]
async fn unknown_user_gets_zero_balance() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt("nobody", vec![Role::seeker()]);

    let (status, body) = srv.get(&token, "/wallet").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["balance"].as_f64(), Some(0.0));
    assert_eq!(body["data"]["currency"], "USD");
    assert_eq!(body["data"]["total_earned"].as_f64(), Some(0.0));
    assert_eq!(body["data"]["exists"], false);
}

#[tokio::test]
async fn open_wallet_is_idempotent() {
    let srv = TestServer::spawn().await;
    let token = mint_jwt("p-1", vec![Role::provider()]);

    let (status, body) = srv.post(&token, "/wallet", json!({ "currency": "EUR" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["currency"], "EUR");

    let (status, body) = srv.post(&token, "/wallet", json!({ "currency": "GBP" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["currency"], "EUR");
}

#[tokio::test]
async fn deposit_withdraw_transfer_scenario() {
    let srv = TestServer::spawn().await;
    let u = mint_jwt("user-u", vec![Role::seeker()]);
    let v = mint_jwt("user-v", vec![Role::provider()]);

    // V becomes a known user on first authenticated request.
    let (status, _) = srv.get(&v, "/whoami").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = srv
        .post(&u, "/wallet/deposit", json!({ "amount": 200, "method": "card" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["transaction"]["type"], "credit");
    assert_eq!(body["data"]["wallet"]["balance"].as_f64(), Some(200.0));

    let (status, body) = srv
        .post(
            &u,
            "/wallet/withdraw",
            json!({ "amount": 250, "bank_details": bank_details() }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "insufficient_funds");
    assert_eq!(srv.balance(&u).await, 200.0);

    let (status, body) = srv
        .post(
            &u,
            "/wallet/transfer",
            json!({ "recipient_id": "user-v", "amount": 150, "description": "session" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["transaction"]["amount"].as_f64(), Some(-150.0));
    assert_eq!(body["data"]["received"]["user_id"], "user-v");

    assert_eq!(srv.balance(&u).await, 50.0);
    assert_eq!(srv.balance(&v).await, 150.0);
}

#[tokio::test]
async fn transfer_rejects_self_and_unknown_recipients() {
    let srv = TestServer::spawn().await;
    let u = mint_jwt("user-u", vec![Role::seeker()]);
    srv.post(&u, "/wallet/deposit", json!({ "amount": 50 })).await;

    let (status, body) = srv
        .post(&u, "/wallet/transfer", json!({ "recipient_id": "user-u", "amount": 10 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_recipient");

    let (status, body) = srv
        .post(&u, "/wallet/transfer", json!({ "recipient_id": "ghost", "amount": 10 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_recipient");

    assert_eq!(srv.balance(&u).await, 50.0);
}

#[tokio::test]
async fn invalid_amounts_are_rejected() {
    let srv = TestServer::spawn().await;
    let u = mint_jwt("user-u", vec![Role::seeker()]);

    for amount in [json!(0), json!(-5), json!(10.005), json!(5e12)] {
        let (status, body) = srv
            .post(&u, "/wallet/deposit", json!({ "amount": amount }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "amount {amount}");
        assert_eq!(body["error"], "invalid_amount");
    }

    let (status, body) = srv.post(&u, "/wallet/deposit", json!({ "currency": "USD" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_body");
}

#[tokio::test]
async fn transaction_history_is_paginated_newest_first() {
    let srv = TestServer::spawn().await;
    let u = mint_jwt("user-u", vec![Role::seeker()]);

    for i in 1..=5 {
        let (status, _) = srv
            .post(&u, "/wallet/deposit", json!({ "amount": i * 10 }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    srv.post(&u, "/wallet/pay", json!({ "amount": 5, "consultation_id": "c-9" }))
        .await;

    let (status, first) = srv.get(&u, "/wallet/transactions?page=1&limit=4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["pagination"]["total"], 6);
    assert_eq!(first["pagination"]["total_pages"], 2);
    assert_eq!(first["pagination"]["has_next"], true);
    let items = first["data"].as_array().unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(items[0]["type"], "debit");
    assert_eq!(items[0]["consultation_id"], "c-9");
    assert_eq!(items[1]["amount"].as_f64(), Some(50.0));

    let (_, second) = srv.get(&u, "/wallet/transactions?page=2&limit=4").await;
    let rest = second["data"].as_array().unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[1]["amount"].as_f64(), Some(10.0));
    assert_eq!(second["pagination"]["has_prev"], true);

    let (_, credits) = srv.get(&u, "/wallet/transactions?type=credit").await;
    assert_eq!(credits["pagination"]["total"], 5);
}

#[tokio::test]
async fn transactions_are_private_to_their_owner() {
    let srv = TestServer::spawn().await;
    let u = mint_jwt("user-u", vec![Role::seeker()]);
    let w = mint_jwt("user-w", vec![Role::seeker()]);

    let (_, body) = srv.post(&u, "/wallet/deposit", json!({ "amount": 20 })).await;
    let id = body["data"]["transaction"]["id"].as_str().unwrap().to_string();

    let (status, body) = srv.get(&u, &format!("/wallet/transactions/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id.as_str());

    let (status, _) = srv.get(&w, &format!("/wallet/transactions/{id}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = srv.get(&u, "/wallet/transactions/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refunds_require_finance_role() {
    let srv = TestServer::spawn().await;
    let u = mint_jwt("user-u", vec![Role::seeker()]);
    let fin = mint_jwt("fin-1", vec![Role::finance()]);
    srv.post(&u, "/wallet/deposit", json!({ "amount": 100 })).await;

    let refund = json!({ "amount": 30, "payment_id": "pay-1", "reason": "cancelled session" });

    let (status, body) = srv.post(&u, "/admin/wallets/user-u/refund", refund.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (status, body) = srv.post(&fin, "/admin/wallets/user-u/refund", refund).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["transaction"]["type"], "refund");
    assert_eq!(body["data"]["wallet"]["balance"].as_f64(), Some(130.0));
    assert_eq!(body["data"]["wallet"]["total_earned"].as_f64(), Some(100.0));
}

#[tokio::test]
async fn failed_withdrawal_restores_balance() {
    let srv = TestServer::spawn().await;
    let u = mint_jwt("user-u", vec![Role::provider()]);
    let fin = mint_jwt("fin-1", vec![Role::finance()]);
    srv.post(&u, "/wallet/deposit", json!({ "amount": 100 })).await;

    let (status, body) = srv
        .post(
            &u,
            "/wallet/withdraw",
            json!({ "amount": 40, "bank_details": bank_details() }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["transaction"]["status"], "pending");
    assert_eq!(body["data"]["transaction"]["bank_details"]["account_number"], "****5678");
    assert_eq!(body["data"]["wallet"]["pending_withdrawals"].as_f64(), Some(40.0));
    let id = body["data"]["transaction"]["id"].as_str().unwrap().to_string();
    assert_eq!(srv.balance(&u).await, 60.0);

    let path = format!("/admin/withdrawals/{id}/settle");
    let (status, _) = srv.post(&u, &path, json!({ "outcome": "completed" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = srv
        .post(&fin, &path, json!({ "outcome": "failed", "reason": "bank rejected" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["transaction"]["status"], "failed");
    assert_eq!(body["data"]["transaction"]["failure_reason"], "bank rejected");
    assert_eq!(srv.balance(&u).await, 100.0);

    let (status, body) = srv.post(&fin, &path, json!({ "outcome": "completed" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn withdrawal_without_bank_details_is_rejected() {
    let srv = TestServer::spawn().await;
    let u = mint_jwt("user-u", vec![Role::provider()]);
    srv.post(&u, "/wallet/deposit", json!({ "amount": 100 })).await;

    let (status, body) = srv.post(&u, "/wallet/withdraw", json!({ "amount": 10 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
    assert_eq!(srv.balance(&u).await, 100.0);
}

#[tokio::test]
async fn inactive_wallet_rejects_payments() {
    let srv = TestServer::spawn().await;
    let u = mint_jwt("user-u", vec![Role::seeker()]);
    let admin = mint_jwt("root", vec![Role::admin()]);
    srv.post(&u, "/wallet/deposit", json!({ "amount": 100 })).await;

    let (status, body) = srv
        .post(&admin, "/admin/wallets/user-u/active", json!({ "active": false }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_active"], false);

    let (status, body) = srv.post(&u, "/wallet/pay", json!({ "amount": 10 })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "wallet_inactive");

    let (status, _) = srv
        .post(&admin, "/admin/wallets/ghost/active", json!({ "active": false }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
