//! Invoice delivery integration tests for invoicing-service.

mod common;

use common::{id_of, standard_invoice, TestApp};
use reqwest::Method;
use serde_json::{json, Value};

#[tokio::test]
async fn sending_emails_the_document_and_marks_sent() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);

    let response = app
        .request(Method::POST, &format!("/invoices/{}/send", id), Some(app.member))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["recipient"], "billing@acme.test");
    assert_eq!(outcome["invoice"]["status"], "SENT");
    assert_eq!(outcome["provider_id"], "test-message-id");

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "billing@acme.test");
    assert_eq!(sent[0].subject, "Invoice INV-000001");
    assert_eq!(sent[0].attachment_name, "INV-000001.html");
    assert!(!sent[0].attachment.is_empty());
}

#[tokio::test]
async fn explicit_recipient_overrides_client_email() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);

    let response = app
        .request(Method::POST, &format!("/invoices/{}/send", id), Some(app.owner))
        .json(&json!({ "recipient": "ap@acme.test" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(app.mailer.sent()[0].to, "ap@acme.test");
}

#[tokio::test]
async fn sending_without_any_recipient_is_rejected() {
    let app = TestApp::spawn().await;
    let id = id_of(
        &app.create_invoice(&json!({
            "client_name": "Walk-in",
            "items": [{ "description": "Repair", "quantity": "1", "unit_price": "80" }]
        }))
        .await,
    );

    let response = app
        .request(Method::POST, &format!("/invoices/{}/send", id), Some(app.owner))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn failed_delivery_leaves_status_untouched() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);
    app.mailer.fail_next_sends(true);

    let response = app
        .request(Method::POST, &format!("/invoices/{}/send", id), Some(app.owner))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    let invoice = app.get_invoice(&id).await;
    assert_eq!(invoice["status"], "DRAFT");
    assert!(invoice["sent_utc"].is_null());
    assert!(!app
        .activity(&id)
        .await
        .iter()
        .any(|e| e["action"] == "invoice.sent"));
}

#[tokio::test]
async fn resending_a_paid_invoice_keeps_it_paid() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);
    app.set_status(&id, "PAID").await;

    let outcome: Value = app
        .request(Method::POST, &format!("/invoices/{}/send", id), Some(app.owner))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(outcome["invoice"]["status"], "PAID");
    assert_eq!(app.mailer.sent().len(), 1);
}

#[tokio::test]
async fn viewers_cannot_send() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);

    let response = app
        .request(Method::POST, &format!("/invoices/{}/send", id), Some(app.viewer))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    assert!(app.mailer.sent().is_empty());
}
