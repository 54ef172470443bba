//! Invoice CRUD integration tests for invoicing-service.

mod common;

use common::{id_of, money, standard_invoice, TestApp};
use invoicing_service::models::Role;
use reqwest::Method;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn create_invoice_computes_totals_from_items() {
    let app = TestApp::spawn().await;

    let invoice = app
        .create_invoice(&json!({
            "client_name": "Acme Corp",
            "tax_rate": "10",
            "items": [
                { "description": "Design", "quantity": "2", "unit_price": "50" },
                { "description": "Build", "quantity": "1", "unit_price": "100" }
            ]
        }))
        .await;

    assert_eq!(invoice["status"], "DRAFT");
    assert_eq!(invoice["currency"], "USD");
    assert_eq!(money(&invoice["subtotal"]), dec!(200));
    assert_eq!(money(&invoice["tax_amount"]), dec!(20));
    assert_eq!(money(&invoice["grand_total"]), dec!(220));
    assert_eq!(money(&invoice["balance_due"]), dec!(220));

    let items = invoice["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(money(&items[0]["amount"]), dec!(100));
    assert_eq!(items[0]["position"], 0);
    assert_eq!(items[1]["position"], 1);
}

#[tokio::test]
async fn invoice_numbers_follow_a_per_workspace_sequence() {
    let app = TestApp::spawn().await;

    let first = app.create_invoice(&standard_invoice()).await;
    let second = app.create_invoice(&standard_invoice()).await;

    assert_eq!(first["invoice_number"], "INV-000001");
    assert_eq!(second["invoice_number"], "INV-000002");
}

#[tokio::test]
async fn create_invoice_rejects_empty_items() {
    let app = TestApp::spawn().await;

    let response = app
        .request(Method::POST, "/invoices", Some(app.owner))
        .json(&json!({ "client_name": "Acme Corp", "items": [] }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 422);

    let list: Vec<Value> = app
        .request(Method::GET, "/invoices", Some(app.owner))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list.is_empty());
}

#[tokio::test]
async fn create_invoice_rejects_negative_quantities() {
    let app = TestApp::spawn().await;

    let response = app
        .request(Method::POST, "/invoices", Some(app.owner))
        .json(&json!({
            "client_name": "Acme Corp",
            "items": [{ "description": "Refund", "quantity": "-1", "unit_price": "10" }]
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn create_invoice_rejects_totals_beyond_decimal_range() {
    let app = TestApp::spawn().await;

    let response = app
        .request(Method::POST, "/invoices", Some(app.owner))
        .json(&json!({
            "client_name": "Acme Corp",
            "tax_rate": "0.5",
            "items": [{
                "description": "Everything",
                "quantity": "1",
                "unit_price": "79000000000000000000000000000"
            }]
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Validation error");

    // Server is still serving.
    app.create_invoice(&standard_invoice()).await;
}

#[tokio::test]
async fn create_invoice_rounds_amounts_to_six_places() {
    let app = TestApp::spawn().await;

    let invoice = app
        .create_invoice(&json!({
            "client_name": "Acme Corp",
            "tax_rate": "7.5",
            "items": [{ "description": "Hours", "quantity": "3", "unit_price": "0.333333" }]
        }))
        .await;

    assert_eq!(money(&invoice["subtotal"]), dec!(0.999999));
    assert_eq!(money(&invoice["tax_amount"]), dec!(0.075));
    assert_eq!(money(&invoice["grand_total"]), dec!(1.074999));
}

#[tokio::test]
async fn malformed_bodies_get_a_json_validation_error() {
    let app = TestApp::spawn().await;

    let response = app
        .request(Method::POST, "/invoices", Some(app.owner))
        .header("content-type", "application/json")
        .body("{ \"client_name\": ")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.expect("error body is not JSON");
    assert_eq!(body["error"], "Validation error");
    assert!(body["details"].is_string());

    let response = app
        .request(Method::POST, "/invoices", Some(app.owner))
        .json(&json!({
            "client_name": "Acme Corp",
            "due_date": "next tuesday",
            "items": [{ "description": "Fee", "quantity": "1", "unit_price": "10" }]
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.expect("error body is not JSON");
    assert_eq!(body["error"], "Validation error");
}

#[tokio::test]
async fn update_replaces_every_line_item() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(&standard_invoice()).await;
    let id = id_of(&invoice);

    let response = app
        .request(Method::PUT, &format!("/invoices/{}", id), Some(app.member))
        .json(&json!({
            "client_name": "Acme Corp",
            "tax_rate": "0",
            "items": [{ "description": "Retainer", "quantity": "1", "unit_price": "75" }]
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 200);

    let fetched = app.get_invoice(&id).await;
    let items = fetched["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["description"], "Retainer");
    assert_eq!(money(&fetched["subtotal"]), dec!(75));
    assert_eq!(money(&fetched["tax_amount"]), dec!(0));
    assert_eq!(money(&fetched["grand_total"]), dec!(75));
    assert_eq!(fetched["invoice_number"], invoice["invoice_number"]);
}

#[tokio::test]
async fn list_invoices_filters_by_status() {
    let app = TestApp::spawn().await;
    let draft = app.create_invoice(&standard_invoice()).await;
    let sent = app.create_invoice(&standard_invoice()).await;
    assert_eq!(app.set_status(&id_of(&sent), "SENT").await.status(), 200);

    let drafts: Vec<Value> = app
        .request(Method::GET, "/invoices?status=DRAFT", Some(app.viewer))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0]["invoice_id"], draft["invoice_id"]);
}

#[tokio::test]
async fn delete_removes_invoice_and_payments() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(&standard_invoice()).await;
    let id = id_of(&invoice);
    app.record_payment(&id, &json!({ "amount": "50" })).await;

    let response = app
        .request(Method::DELETE, &format!("/invoices/{}", id), Some(app.owner))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = app
        .request(Method::GET, &format!("/invoices/{}", id), Some(app.owner))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = app
        .request(Method::GET, &format!("/invoices/{}/payments", id), Some(app.owner))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn members_cannot_delete_invoices() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(&standard_invoice()).await;

    let response = app
        .request(
            Method::DELETE,
            &format!("/invoices/{}", id_of(&invoice)),
            Some(app.member),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn viewers_can_read_but_not_create() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(&standard_invoice()).await;

    let response = app
        .request(
            Method::GET,
            &format!("/invoices/{}", id_of(&invoice)),
            Some(app.viewer),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = app
        .request(Method::POST, "/invoices", Some(app.viewer))
        .json(&standard_invoice())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn requests_without_a_user_are_unauthorized() {
    let app = TestApp::spawn().await;

    let response = app
        .request(Method::POST, "/invoices", None)
        .json(&standard_invoice())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn non_members_are_forbidden() {
    let app = TestApp::spawn().await;

    let response = app
        .request(Method::GET, "/invoices", Some(Uuid::new_v4()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn missing_workspace_header_is_a_bad_request() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/invoices", app.address))
        .header("X-User-ID", app.owner.to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn invoices_are_invisible_to_other_workspaces() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(&standard_invoice()).await;

    let other_workspace = Uuid::new_v4();
    app.store
        .add_member(other_workspace, app.owner, Role::Owner)
        .await;

    let response = app
        .request_in(
            other_workspace,
            Method::GET,
            &format!("/invoices/{}", id_of(&invoice)),
            Some(app.owner),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let listed: Vec<Value> = app
        .request_in(other_workspace, Method::GET, "/invoices", Some(app.owner))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn download_returns_rendered_document() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(&standard_invoice()).await;

    let response = app
        .request(
            Method::GET,
            &format!("/invoices/{}/document", id_of(&invoice)),
            Some(app.viewer),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let disposition = response
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(disposition.contains("INV-000001.html"));

    let body = response.text().await.unwrap();
    assert!(body.contains("Acme Corp"));
    assert!(body.contains("220.00 USD"));
}
