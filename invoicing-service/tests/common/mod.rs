use async_trait::async_trait;
use invoicing_service::models::Role;
use invoicing_service::services::{
    DeliveryError, DeliveryReceipt, HtmlInvoiceRenderer, InvoiceEmail, InvoiceMailer, MemoryStore,
};
use invoicing_service::startup::{AppState, Application};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Captures outgoing invoice emails; can be switched to fail.
#[derive(Default)]
pub struct RecordingMailer {
    fail: AtomicBool,
    sent: Mutex<Vec<InvoiceEmail>>,
}

impl RecordingMailer {
    pub fn fail_next_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<InvoiceEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl InvoiceMailer for RecordingMailer {
    async fn send(&self, email: InvoiceEmail) -> Result<DeliveryReceipt, DeliveryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeliveryError::SendFailed("relay rejected message".to_string()));
        }
        self.sent.lock().unwrap().push(email);
        Ok(DeliveryReceipt {
            provider_id: Some("test-message-id".to_string()),
        })
    }
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<RecordingMailer>,
    pub workspace_id: Uuid,
    pub owner: Uuid,
    pub member: Uuid,
    pub viewer: Uuid,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::default());

        let workspace_id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        store.add_member(workspace_id, owner, Role::Owner).await;
        store.add_member(workspace_id, member, Role::Member).await;
        store.add_member(workspace_id, viewer, Role::Viewer).await;

        let state = AppState::new(
            store.clone(),
            mailer.clone(),
            Arc::new(HtmlInvoiceRenderer),
        );
        let app = Application::with_state(SocketAddr::from(([127, 0, 0, 1], 0)), state)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to answer
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
            store,
            mailer,
            workspace_id,
            owner,
            member,
            viewer,
        }
    }

    /// Request scoped to this app's workspace, acting as `user`.
    pub fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        user: Option<Uuid>,
    ) -> reqwest::RequestBuilder {
        self.request_in(self.workspace_id, method, path, user)
    }

    pub fn request_in(
        &self,
        workspace_id: Uuid,
        method: reqwest::Method,
        path: &str,
        user: Option<Uuid>,
    ) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.address, path))
            .header("X-Workspace-ID", workspace_id.to_string());
        match user {
            Some(user_id) => builder.header("X-User-ID", user_id.to_string()),
            None => builder,
        }
    }

    pub async fn create_invoice(&self, body: &Value) -> Value {
        let response = self
            .request(reqwest::Method::POST, "/invoices", Some(self.owner))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), 201, "create invoice failed");
        response.json().await.expect("Failed to parse invoice")
    }

    pub async fn get_invoice(&self, invoice_id: &str) -> Value {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/invoices/{}", invoice_id),
                Some(self.owner),
            )
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), 200);
        response.json().await.expect("Failed to parse invoice")
    }

    pub async fn set_status(&self, invoice_id: &str, status: &str) -> reqwest::Response {
        self.request(
            reqwest::Method::PATCH,
            &format!("/invoices/{}/status", invoice_id),
            Some(self.owner),
        )
        .json(&json!({ "status": status }))
        .send()
        .await
        .expect("Failed to execute request")
    }

    pub async fn record_payment(&self, invoice_id: &str, body: &Value) -> reqwest::Response {
        self.request(
            reqwest::Method::POST,
            &format!("/invoices/{}/payments", invoice_id),
            Some(self.member),
        )
        .json(body)
        .send()
        .await
        .expect("Failed to execute request")
    }

    pub async fn payments(&self, invoice_id: &str) -> Vec<Value> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/invoices/{}/payments", invoice_id),
                Some(self.owner),
            )
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), 200);
        response.json().await.expect("Failed to parse payments")
    }

    pub async fn activity(&self, invoice_id: &str) -> Vec<Value> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/activity?invoice_id={}", invoice_id),
                Some(self.owner),
            )
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status(), 200);
        response.json().await.expect("Failed to parse activity")
    }
}

/// Two units at 100 with 10% tax: 200 / 20 / 220.
pub fn standard_invoice() -> Value {
    json!({
        "client_name": "Acme Corp",
        "client_email": "billing@acme.test",
        "currency": "USD",
        "tax_rate": "10",
        "items": [
            { "description": "Consulting", "quantity": "2", "unit_price": "100" }
        ]
    })
}

/// Decimal fields may be serialized as strings or numbers.
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("Invalid decimal string"),
        Value::Number(n) => n.to_string().parse().expect("Invalid decimal number"),
        other => panic!("Expected a decimal, got {}", other),
    }
}

pub fn id_of(invoice: &Value) -> String {
    invoice["invoice_id"]
        .as_str()
        .expect("Missing invoice_id")
        .to_string()
}
