//! Status lifecycle integration tests for invoicing-service.

mod common;

use common::{id_of, money, standard_invoice, TestApp};
use reqwest::Method;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

fn status_changes(activity: &[Value]) -> usize {
    activity
        .iter()
        .filter(|entry| entry["action"] == "invoice.status_changed")
        .count()
}

#[tokio::test]
async fn marking_paid_books_the_outstanding_balance() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);

    let response = app.set_status(&id, "PAID").await;
    assert_eq!(response.status(), 200);

    let change: Value = response.json().await.unwrap();
    assert_eq!(change["invoice"]["status"], "PAID");
    assert_eq!(change["transition"]["from"], "DRAFT");
    assert_eq!(change["transition"]["to"], "PAID");
    assert_eq!(money(&change["settlement"]["amount"]), dec!(220));

    let payments = app.payments(&id).await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["source"], "SETTLEMENT");
}

#[tokio::test]
async fn repeating_the_same_status_is_idempotent() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);

    assert_eq!(app.set_status(&id, "PAID").await.status(), 200);
    let response = app.set_status(&id, "PAID").await;
    assert_eq!(response.status(), 200);

    let change: Value = response.json().await.unwrap();
    assert_eq!(change["transition"]["kind"], "unchanged");
    assert!(change["settlement"].is_null());

    assert_eq!(app.payments(&id).await.len(), 1);
    assert_eq!(app.get_invoice(&id).await["status"], "PAID");
    assert_eq!(status_changes(&app.activity(&id).await), 2);
}

#[tokio::test]
async fn marking_paid_after_a_partial_payment_settles_only_the_rest() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);
    app.record_payment(&id, &json!({ "amount": "100" })).await;

    let change: Value = app.set_status(&id, "PAID").await.json().await.unwrap();
    assert_eq!(money(&change["settlement"]["amount"]), dec!(120));

    let invoice = app.get_invoice(&id).await;
    assert_eq!(money(&invoice["amount_paid"]), dec!(220));
    assert_eq!(money(&invoice["balance_due"]), dec!(0));
}

#[tokio::test]
async fn reverting_paid_removes_only_the_settlement() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);
    app.record_payment(&id, &json!({ "amount": "100" })).await;
    app.set_status(&id, "PAID").await;

    let change: Value = app.set_status(&id, "SENT").await.json().await.unwrap();
    assert_eq!(change["invoice"]["status"], "SENT");
    assert_eq!(change["removed_settlements"], 1);
    assert!(change["invoice"]["paid_utc"].is_null());

    let payments = app.payments(&id).await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["source"], "MANUAL");
    assert_eq!(money(&payments[0]["amount"]), dec!(100));
}

#[tokio::test]
async fn reverting_paid_keeps_recorded_payments() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);
    app.record_payment(&id, &json!({ "amount": "120" })).await;
    let paid: Value = app
        .record_payment(&id, &json!({ "amount": "100" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(paid["invoice"]["status"], "PAID");

    let change: Value = app.set_status(&id, "SENT").await.json().await.unwrap();
    assert_eq!(change["invoice"]["status"], "SENT");
    assert_eq!(change["removed_settlements"], 0);

    let payments = app.payments(&id).await;
    assert_eq!(payments.len(), 2);
    assert!(payments.iter().all(|p| p["source"] == "MANUAL"));
}

#[tokio::test]
async fn nothing_returns_to_draft() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);
    app.set_status(&id, "SENT").await;

    let response = app.set_status(&id, "DRAFT").await;
    assert_eq!(response.status(), 409);
    assert_eq!(app.get_invoice(&id).await["status"], "SENT");
}

#[tokio::test]
async fn unknown_status_values_are_rejected() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);

    let response = app.set_status(&id, "ARCHIVED").await;

    assert!(response.status().is_client_error());
    assert_eq!(app.get_invoice(&id).await["status"], "DRAFT");
}

#[tokio::test]
async fn status_changes_are_audited_with_both_states() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);
    app.set_status(&id, "SENT").await;

    let activity = app.activity(&id).await;
    let entry = activity
        .iter()
        .find(|e| e["action"] == "invoice.status_changed")
        .expect("missing status audit entry");
    assert_eq!(entry["details"], "DRAFT -> SENT");
    assert_eq!(entry["actor_id"], app.owner.to_string());
}

#[tokio::test]
async fn viewers_cannot_change_status() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);

    let response = app
        .request(
            Method::PATCH,
            &format!("/invoices/{}/status", id),
            Some(app.viewer),
        )
        .json(&json!({ "status": "PAID" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    assert!(app.payments(&id).await.is_empty());
}

#[tokio::test]
async fn paid_invoices_cannot_be_edited() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);
    app.record_payment(&id, &json!({ "amount": "220" })).await;

    let larger = json!({
        "client_name": "Acme Corp",
        "tax_rate": "10",
        "items": [{ "description": "Consulting", "quantity": "20", "unit_price": "100" }]
    });
    let response = app
        .request(Method::PUT, &format!("/invoices/{}", id), Some(app.owner))
        .json(&larger)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    let invoice = app.get_invoice(&id).await;
    assert_eq!(invoice["status"], "PAID");
    assert_eq!(money(&invoice["grand_total"]), dec!(220));
    assert_eq!(money(&invoice["balance_due"]), dec!(0));
}

#[tokio::test]
async fn reverted_invoices_can_be_edited_again() {
    let app = TestApp::spawn().await;
    let id = id_of(&app.create_invoice(&standard_invoice()).await);
    app.set_status(&id, "PAID").await;
    app.set_status(&id, "SENT").await;

    let response = app
        .request(Method::PUT, &format!("/invoices/{}", id), Some(app.owner))
        .json(&json!({
            "client_name": "Acme Corp",
            "tax_rate": "10",
            "items": [{ "description": "Consulting", "quantity": "20", "unit_price": "100" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let invoice = app.get_invoice(&id).await;
    assert_eq!(invoice["status"], "SENT");
    assert_eq!(money(&invoice["grand_total"]), dec!(2200));
    assert_eq!(money(&invoice["balance_due"]), dec!(2200));
}
