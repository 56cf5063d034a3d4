#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use invoicing_service::config::{
    DatabaseConfig, InvoicingConfig, NumberingConfig, RendererConfig, SmtpConfig, StoreBackend,
};
use invoicing_service::models::{Business, Contact};
use invoicing_service::services::{ComplianceRenderer, InMemoryStore, MockMailer};
use invoicing_service::{build_router, AppState};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_USER: &str = "user-1";
pub const OTHER_USER: &str = "user-2";
pub const PDF_BYTES: &[u8] = b"%PDF-1.7 test document";
pub const XML_BODY: &str = "<Invoice><ID>test</ID></Invoice>";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub mailer: Arc<MockMailer>,
    pub renderer: Option<MockServer>,
    pub business_id: Uuid,
    pub contact_id: Uuid,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

fn test_config(renderer_url: Option<String>) -> InvoicingConfig {
    InvoicingConfig {
        common: CoreConfig {
            port: 0,
            log_level: "info".to_string(),
        },
        database: DatabaseConfig {
            backend: StoreBackend::Memory,
            url: Secret::new(String::new()),
            max_connections: 1,
            min_connections: 0,
        },
        numbering: NumberingConfig {
            prefix: "INV-".to_string(),
        },
        currency: "EUR".to_string(),
        renderer: RendererConfig {
            base_url: renderer_url,
            api_token: Secret::new("test-token".to_string()),
            success_status: "OK".to_string(),
            timeout_secs: 5,
        },
        smtp: SmtpConfig {
            host: "smtp.test.local".to_string(),
            port: 587,
            user: "test".to_string(),
            password: Secret::new("test".to_string()),
            from_email: "billing@example.com".to_string(),
            from_name: "Test Billing".to_string(),
            enabled: false, // Use mock
        },
        otlp_endpoint: None,
    }
}

/// Renderer that accepts every document and serves fixed artifacts.
pub async fn healthy_renderer() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/documents/skeleton"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Status": "OK",
            "Document": { "DocumentType": "Invoice", "Profile": "EN16931" }
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/documents/save"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Status": "OK",
            "PdfUrl": format!("{}/files/invoice.pdf", server.uri()),
            "XmlUrl": format!("{}/files/invoice.xml", server.uri()),
        })))
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

    server
}

/// Renderer whose skeleton call answers with a non-success status.
pub async fn rejecting_renderer() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/documents/skeleton"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Status": "ERROR",
            "Document": null
        })))
        .mount(&server)
        .await;

    server
}

impl TestApp {
    /// App with a working renderer.
    pub async fn spawn() -> Self {
        let server = healthy_renderer().await;
        let url = server.uri();
        Self::build(Some(url), Some(server))
    }

    /// App whose renderer is a wiremock server set up by the caller.
    pub fn with_renderer(server: MockServer) -> Self {
        let url = server.uri();
        Self::build(Some(url), Some(server))
    }

    /// App whose renderer address refuses connections.
    pub fn with_unreachable_renderer() -> Self {
        Self::build(Some("http://127.0.0.1:1".to_string()), None)
    }

    fn build(renderer_url: Option<String>, renderer: Option<MockServer>) -> Self {
        let config = test_config(renderer_url);

        let store = Arc::new(InMemoryStore::new());
        let business_id = Uuid::new_v4();
        let contact_id = Uuid::new_v4();

        store
            .insert_business(Business {
                business_id,
                name: "Widget Works Ltd".to_string(),
                email: Some("accounts@widgetworks.test".to_string()),
                street: Some("Factory Lane 4".to_string()),
                city: Some("Hamburg".to_string()),
                postcode: Some("20095".to_string()),
                tax_number: Some("DE123456789".to_string()),
                iban: Some("DE89370400440532013000".to_string()),
            })
            .expect("Failed to seed business");
        store
            .add_member(TEST_USER, business_id)
            .expect("Failed to seed membership");
        store
            .insert_contact(Contact {
                contact_id,
                business_id,
                name: "Acme GmbH".to_string(),
                email: Some("billing@acme.test".to_string()),
                street: Some("Main Street 1".to_string()),
                city: Some("Berlin".to_string()),
                postcode: Some("10115".to_string()),
                tax_number: Some("DE987654321".to_string()),
                invoice_count: 0,
                total_value: Decimal::ZERO,
                created_at: Utc::now(),
            })
            .expect("Failed to seed contact");

        // A second business the test user does not belong to
        let foreign_business = Uuid::new_v4();
        store
            .insert_business(Business {
                business_id: foreign_business,
                name: "Other Co".to_string(),
                email: None,
                street: None,
                city: None,
                postcode: None,
                tax_number: None,
                iban: None,
            })
            .expect("Failed to seed business");
        store
            .add_member(OTHER_USER, foreign_business)
            .expect("Failed to seed membership");

        let compliance =
            ComplianceRenderer::new(config.renderer.clone()).expect("Failed to build renderer");
        let mailer = Arc::new(MockMailer::new(true));

        let state = AppState::new(config, store.clone(), Arc::new(compliance), mailer.clone());

        TestApp {
            router: build_router(state),
            store,
            mailer,
            renderer,
            business_id,
            contact_id,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let response = self.raw_request(method, uri, user, body).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    pub async fn raw_request(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("X-User-ID", user);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed")
    }

    /// Widget invoice: 2 x 50.00 at 10% tax, totals 100 / 10 / 110.
    pub fn widget_invoice(&self) -> Value {
        json!({
            "businessId": self.business_id,
            "contactId": self.contact_id,
            "clientName": "Acme GmbH",
            "clientEmail": "billing@acme.test",
            "clientStreet": "Main Street 1",
            "clientCity": "Berlin",
            "clientPostcode": "10115",
            "currency": "EUR",
            "issueDate": "2026-01-15",
            "dueDate": "2026-02-14",
            "items": [
                { "description": "Widget", "quantity": 2, "unitPrice": "50.00", "taxRate": 10 }
            ]
        })
    }

    pub async fn create_widget_invoice(&self) -> Value {
        let response = self
            .request(
                Method::POST,
                "/invoices/create",
                Some(TEST_USER),
                Some(self.widget_invoice()),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["invoice"].clone()
    }

    pub fn contact_aggregates(&self) -> (i32, Decimal) {
        let contact = self
            .store
            .contact(self.contact_id)
            .expect("store available")
            .expect("contact exists");
        (contact.invoice_count, contact.total_value)
    }
}

/// Decimals travel as strings; compare them numerically.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a decimal: {}", other),
    }
}

pub fn email_request() -> Value {
    json!({
        "method": "email",
        "recipients": ["billing@acme.test"],
        "subject": "Your invoice",
        "message": "Hello,\n\nplease find your invoice attached."
    })
}
