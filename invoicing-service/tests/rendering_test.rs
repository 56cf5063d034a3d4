//! Compliance document rendering and downloads.

mod common;

use axum::body::to_bytes;
use axum::http::{header, Method, StatusCode};
use common::{rejecting_renderer, TestApp, PDF_BYTES, TEST_USER, XML_BODY};
use serde_json::json;
use serde_json::Value;
use wiremock::matchers::{body_partial_json, header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn successful_render_stores_urls_and_content() {
    let app = TestApp::spawn().await;

    let response = app
        .request(
            Method::POST,
            "/invoices/create",
            Some(TEST_USER),
            Some(app.widget_invoice()),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert!(response.body.get("warning").is_none());
    let invoice = &response.body["invoice"];
    assert!(invoice["pdfUrl"]
        .as_str()
        .is_some_and(|u| u.ends_with("/files/invoice.pdf")));
    assert!(invoice["xmlUrl"]
        .as_str()
        .is_some_and(|u| u.ends_with("/files/invoice.xml")));
    assert_eq!(invoice["hasPdf"], true);
    assert_eq!(invoice["hasXml"], true);
}

#[tokio::test]
async fn pdf_and_xml_downloads_serve_stored_content() {
    let app = TestApp::spawn().await;
    let invoice = app.create_widget_invoice().await;
    let id = invoice["id"].as_str().expect("invoice id");

    let pdf = app
        .raw_request(
            Method::GET,
            &format!("/invoices/{}/pdf", id),
            Some(TEST_USER),
            None,
        )
        .await;
    assert_eq!(pdf.status(), StatusCode::OK);
    assert_eq!(pdf.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        pdf.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"INV-000001.pdf\""
    );
    let bytes = to_bytes(pdf.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), PDF_BYTES);

    let xml = app
        .raw_request(
            Method::GET,
            &format!("/invoices/{}/xml", id),
            Some(TEST_USER),
            None,
        )
        .await;
    assert_eq!(xml.status(), StatusCode::OK);
    assert_eq!(xml.headers()[header::CONTENT_TYPE], "application/xml");
    let bytes = to_bytes(xml.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), XML_BODY.as_bytes());
}

#[tokio::test]
async fn unreachable_renderer_still_creates_draft_with_warning() {
    let app = TestApp::with_unreachable_renderer();

    let response = app
        .request(
            Method::POST,
            "/invoices/create",
            Some(TEST_USER),
            Some(app.widget_invoice()),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    let invoice = &response.body["invoice"];
    assert_eq!(invoice["status"], "draft");
    assert_eq!(invoice["pdfUrl"], Value::Null);
    assert_eq!(invoice["xmlUrl"], Value::Null);
    assert_eq!(response.body["warning"]["phase"], "skeleton");

    let id = invoice["id"].as_str().expect("invoice id");
    let pdf = app
        .request(
            Method::GET,
            &format!("/invoices/{}/pdf", id),
            Some(TEST_USER),
            None,
        )
        .await;
    assert_eq!(pdf.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_success_status_is_reported_as_warning() {
    let app = TestApp::with_renderer(rejecting_renderer().await);

    let response = app
        .request(
            Method::POST,
            "/invoices/create",
            Some(TEST_USER),
            Some(app.widget_invoice()),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["invoice"]["status"], "draft");
    assert_eq!(response.body["invoice"]["hasPdf"], false);
    assert_eq!(response.body["warning"]["phase"], "skeleton");
}

#[tokio::test]
async fn saved_document_carries_invoice_data_and_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/documents/skeleton"))
        .and(header_matcher("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": "OK",
            "Document": { "DocumentType": "Invoice" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/documents/save"))
        .and(body_partial_json(serde_json::json!({
            "Document": {
                "DocumentType": "Invoice",
                "DocumentNumber": "INV-000001",
                "Currency": "EUR",
                "Buyer": { "Name": "Acme GmbH" },
                "Seller": { "Name": "Widget Works Ltd" }
            },
            "Render": ["pdf", "xml"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": "FAILED"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::with_renderer(server);

    let response = app
        .request(
            Method::POST,
            "/invoices/create",
            Some(TEST_USER),
            Some(app.widget_invoice()),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["warning"]["phase"], "save");
}

#[tokio::test]
async fn edit_rerenders_documents() {
    let app = TestApp::spawn().await;
    let created = app.create_widget_invoice().await;

    let mut body = app.widget_invoice();
    body["id"] = created["id"].clone();
    let edited = app
        .request(Method::PUT, "/invoices/edit", Some(TEST_USER), Some(body))
        .await;

    assert_eq!(edited.status, StatusCode::OK);
    assert_eq!(edited.body["invoice"]["hasPdf"], true);
    assert!(edited.body.get("warning").is_none());

    let server = app.renderer.as_ref().expect("renderer server");
    let skeleton_calls = server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == "/documents/skeleton")
        .count();
    assert_eq!(skeleton_calls, 2);
}

#[tokio::test]
async fn failed_rerender_clears_stale_documents() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/documents/skeleton"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Status": "OK",
            "Document": { "DocumentType": "Invoice" }
        })))
        .mount(&server)
        .await;
    // Only the first save succeeds
    Mock::given(method("POST"))
        .and(path("/documents/save"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Status": "OK",
            "PdfUrl": format!("{}/files/invoice.pdf", server.uri()),
            "XmlUrl": format!("{}/files/invoice.xml", server.uri()),
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/documents/save"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Status": "FAILED" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/invoice.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BYTES))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/invoice.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(XML_BODY))
        .mount(&server)
        .await;

    let app = TestApp::with_renderer(server);
    let created = app.create_widget_invoice().await;
    assert_eq!(created["hasPdf"], true);
    let id = created["id"].as_str().expect("invoice id").to_string();

    let mut body = app.widget_invoice();
    body["id"] = json!(id);
    let edited = app
        .request(Method::PUT, "/invoices/edit", Some(TEST_USER), Some(body))
        .await;

    assert_eq!(edited.status, StatusCode::OK, "{}", edited.body);
    assert_eq!(edited.body["warning"]["phase"], "save");
    let invoice = &edited.body["invoice"];
    assert_eq!(invoice["pdfUrl"], Value::Null);
    assert_eq!(invoice["xmlUrl"], Value::Null);
    assert_eq!(invoice["hasPdf"], false);
    assert_eq!(invoice["hasXml"], false);

    let pdf = app
        .request(
            Method::GET,
            &format!("/invoices/{}/pdf", id),
            Some(TEST_USER),
            None,
        )
        .await;
    assert_eq!(pdf.status, StatusCode::NOT_FOUND);
}
