//! REST transport tests driven through the router with `oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use coffer_adapters::{StaticIdentityDirectory, StaticSettlementGateway};
use coffer_core::{CofferEngine, EngineConfig, InMemoryCofferStorage};
use coffer_daemon::api::rest::{create_router, AppState, IDENTITY_HEADER};
use coffer_daemon::config::SchedulerConfig;
use coffer_daemon::Scheduler;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const OWNER: &str = "02owner";

struct TestApp {
    router: Router,
    gateway: Arc<StaticSettlementGateway>,
    directory: Arc<StaticIdentityDirectory>,
}

impl TestApp {
    fn new() -> Self {
        let gateway = Arc::new(StaticSettlementGateway::new());
        let directory = Arc::new(StaticIdentityDirectory::new());
        let engine = CofferEngine::new(
            Arc::new(InMemoryCofferStorage::new()),
            gateway.clone(),
            directory.clone(),
            EngineConfig::default(),
        );
        let scheduler = Scheduler::new(
            SchedulerConfig {
                enabled: false,
                ..SchedulerConfig::default()
            },
            engine.reconciler().clone(),
        );
        let router = create_router(AppState::new(engine, scheduler), false);
        Self {
            router,
            gateway,
            directory,
        }
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        identity: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(identity) = identity {
            builder = builder.header(IDENTITY_HEADER, identity);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn workspace(&self, id: &str) {
        let (status, _) = self
            .send(
                "POST",
                "/api/v1/workspaces",
                Some(OWNER),
                Some(json!({ "id": id, "name": "Alpha" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    async fn funded_workspace(&self, id: &str, amount: u64) {
        self.workspace(id).await;
        let pr = format!("lnbc-{id}-{amount}");
        let (status, _) = self
            .send(
                "POST",
                &format!("/api/v1/workspaces/{id}/invoices"),
                Some(OWNER),
                Some(json!({ "payment_request": pr, "kind": "BUDGET", "amount": amount })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        self.gateway.settle(&pr);
        let (status, report) = self
            .send(
                "POST",
                &format!("/api/v1/workspaces/{id}/invoices/poll"),
                Some(OWNER),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["credited"], 1);
    }

    async fn member(&self, workspace: &str, identity: &str) {
        self.directory.insert(identity, identity, None);
        let (status, _) = self
            .send(
                "POST",
                &format!("/api/v1/workspaces/{workspace}/members"),
                Some(OWNER),
                Some(json!({ "identity": identity })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

#[tokio::test]
async fn health_reports_backend_and_scheduler() {
    let app = TestApp::new();
    let (status, body) = app.send("GET", "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["scheduler"]["enabled"], false);
}

#[tokio::test]
async fn capability_catalogue_lists_every_role() {
    let app = TestApp::new();
    let (status, body) = app.send("GET", "/api/v1/capabilities", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 12);
    assert!(names.contains(&"VIEW REPORT"));
    assert!(names.contains(&"EDIT ORGANIZATION"));
}

#[tokio::test]
async fn missing_identity_header_is_401() {
    let app = TestApp::new();
    let (status, body) = app
        .send(
            "POST",
            "/api/v1/workspaces",
            None,
            Some(json!({ "name": "Alpha" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn settled_invoice_funds_the_budget_once() {
    let app = TestApp::new();
    app.funded_workspace("ws-1", 5000).await;

    let (status, body) = app
        .send("GET", "/api/v1/workspaces/ws-1/budget", Some(OWNER), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_balance"], 5000);
    assert_eq!(body["total_credited"], 5000);
    assert_eq!(body["pending_invoice_count"], 0);

    let (_, report) = app
        .send("POST", "/api/v1/workspaces/ws-1/invoices/poll", Some(OWNER), None)
        .await;
    assert_eq!(report["examined"], 0);

    let (_, count) = app
        .send("GET", "/api/v1/workspaces/ws-1/invoices/count", Some(OWNER), None)
        .await;
    assert_eq!(count["count"], 0);
}

#[tokio::test]
async fn budget_reads_are_gated_by_view_report() {
    let app = TestApp::new();
    app.funded_workspace("ws-1", 800).await;
    app.member("ws-1", "02bob").await;

    let (status, _) = app
        .send("GET", "/api/v1/workspaces/ws-1/budget", Some("02bob"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, listing) = app
        .send("GET", "/api/v1/identities/02bob/workspaces", None, None)
        .await;
    assert_eq!(listing[0]["budget"], 0);

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/members/02bob/roles",
            Some(OWNER),
            Some(json!({ "roles": ["VIEW REPORT"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send("GET", "/api/v1/workspaces/ws-1/budget", Some("02bob"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_balance"], 800);

    let (_, listing) = app
        .send("GET", "/api/v1/identities/02bob/workspaces", None, None)
        .await;
    assert_eq!(listing[0]["budget"], 800);
}

#[tokio::test]
async fn role_changes_follow_delegation_rules() {
    let app = TestApp::new();
    app.workspace("ws-1").await;
    app.member("ws-1", "02alice").await;
    app.member("ws-1", "02bob").await;

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/members/02alice/roles",
            Some(OWNER),
            Some(json!({ "roles": ["ADD ROLES", "VIEW REPORT"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/members/02alice/roles",
            Some("02alice"),
            Some(json!({ "roles": ["VIEW REPORT"] })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/members/02bob/roles",
            Some("02alice"),
            Some(json!({ "roles": ["PAY BOUNTY"] })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/members/02bob/roles",
            Some(OWNER),
            Some(json!({ "roles": ["MINT"] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_CAPABILITY");

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/members/02bob/roles",
            Some("02alice"),
            Some(json!({ "roles": ["VIEW REPORT"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, remaining) = app
        .send(
            "DELETE",
            "/api/v1/workspaces/ws-1/members/02bob/roles",
            Some("02alice"),
            Some(json!({ "roles": ["VIEW REPORT"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(remaining, json!([]));

    let (_, grants) = app
        .send("GET", "/api/v1/workspaces/ws-1/members/02alice/roles", None, None)
        .await;
    assert_eq!(grants.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn membership_endpoints() {
    let app = TestApp::new();
    app.workspace("ws-1").await;
    app.member("ws-1", "02carol").await;

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/members",
            Some(OWNER),
            Some(json!({ "identity": "02carol" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/members",
            Some(OWNER),
            Some(json!({ "identity": "02ghost" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = app
        .send("GET", "/api/v1/workspaces/ws-1/members", None, None)
        .await;
    assert_eq!(list["count"], 1);

    let (status, _) = app
        .send(
            "DELETE",
            "/api/v1/workspaces/ws-1/members/02carol",
            Some(OWNER),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, list) = app
        .send("GET", "/api/v1/workspaces/ws-1/members", None, None)
        .await;
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn payouts_respect_the_floor_and_payout_ids() {
    let app = TestApp::new();
    app.funded_workspace("ws-1", 300).await;

    let (status, body) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/payouts",
            Some(OWNER),
            Some(json!({ "payout_id": "p-1", "amount": 500 })),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "INSUFFICIENT_BUDGET");

    let (status, entry) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/payouts",
            Some(OWNER),
            Some(json!({ "payout_id": "p-1", "amount": 200, "receiver": "02hunter" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(entry["direction"], "debit");

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/workspaces/ws-1/payouts",
            Some(OWNER),
            Some(json!({ "payout_id": "p-1", "amount": 50 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, history) = app
        .send(
            "GET",
            "/api/v1/workspaces/ws-1/budget/history?limit=1",
            Some(OWNER),
            None,
        )
        .await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["amount"], 200);
}

#[tokio::test]
async fn payment_history_carries_display_fields() {
    let app = TestApp::new();
    app.directory
        .insert(OWNER, "Olive", Some("https://img.example/olive.png"));
    app.funded_workspace("ws-1", 400).await;

    let (status, records) = app
        .send("GET", "/api/v1/workspaces/ws-1/payments", Some(OWNER), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["sender_name"], "Olive");
    assert_eq!(records[0]["receiver_name"], "");
}

#[tokio::test]
async fn deleted_workspace_reads_as_absent() {
    let app = TestApp::new();
    app.workspace("ws-1").await;

    let (status, _) = app
        .send("DELETE", "/api/v1/workspaces/ws-1", Some("02mallory"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send("DELETE", "/api/v1/workspaces/ws-1", Some(OWNER), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, _) = app
        .send("GET", "/api/v1/workspaces/ws-1/members", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listing) = app
        .send("GET", &format!("/api/v1/identities/{OWNER}/workspaces"), None, None)
        .await;
    assert_eq!(listing, json!([]));
}
