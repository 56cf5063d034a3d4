//! Client for the third-party e-invoicing compliance renderer.
//!
//! Rendering is a two-call protocol: fetch a blank document skeleton, then
//! save the populated document asking for PDF and XML output. Both responses
//! carry a `Status` field which must equal the configured success sentinel,
//! whatever the HTTP status code. The rendered files are then downloaded from
//! the returned URLs, each on a best-effort basis.

use crate::config::RendererConfig;
use crate::models::{Business, DocumentArtifacts, Invoice, InvoiceItem};
use crate::services::metrics::RENDER_FAILURES_TOTAL;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use service_core::error::AppError;
use service_core::observability::{TracedClientExt, TracedRequest};
use std::time::Duration;
use thiserror::Error;

/// Unit of measure sent for every line ("one", UN/ECE Rec 20).
pub const DEFAULT_UNIT_CODE: &str = "C62";

/// Protocol step a render failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderPhase {
    Skeleton,
    Save,
    Fetch,
}

impl RenderPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderPhase::Skeleton => "skeleton",
            RenderPhase::Save => "save",
            RenderPhase::Fetch => "fetch",
        }
    }
}

impl std::fmt::Display for RenderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Compliance renderer is not configured")]
    NotConfigured,

    #[error("{phase} request failed: {message}")]
    Transport { phase: RenderPhase, message: String },

    #[error("{phase} rejected by renderer with status '{status}'")]
    Rejected { phase: RenderPhase, status: String },

    #[error("{phase} returned an unexpected response: {message}")]
    Malformed { phase: RenderPhase, message: String },
}

impl RenderError {
    pub fn phase(&self) -> RenderPhase {
        match self {
            RenderError::NotConfigured => RenderPhase::Skeleton,
            RenderError::Transport { phase, .. }
            | RenderError::Rejected { phase, .. }
            | RenderError::Malformed { phase, .. } => *phase,
        }
    }
}

/// Everything the renderer needs about one invoice.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    /// Seller; rendering proceeds with empty seller fields when unknown.
    pub business: Option<Business>,
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Produce PDF and XML renditions. Only skeleton and save failures are
    /// errors; download failures leave the matching content empty.
    async fn render(&self, request: &RenderRequest) -> Result<DocumentArtifacts, RenderError>;

    async fn fetch_pdf(&self, url: &str) -> Result<Vec<u8>, RenderError>;

    async fn fetch_xml(&self, url: &str) -> Result<String, RenderError>;
}

#[derive(Debug, Deserialize)]
struct SkeletonResponse {
    #[serde(rename = "Status")]
    status: Option<String>,
    #[serde(rename = "Document", default)]
    document: Value,
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(rename = "Status")]
    status: Option<String>,
    #[serde(rename = "PdfUrl")]
    pdf_url: Option<String>,
    #[serde(rename = "XmlUrl")]
    xml_url: Option<String>,
}

/// HTTP implementation against the renderer's REST API.
#[derive(Clone)]
pub struct ComplianceRenderer {
    client: reqwest::Client,
    config: RendererConfig,
}

impl ComplianceRenderer {
    pub fn new(config: RendererConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to build renderer client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.base_url.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<String, RenderError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or(RenderError::NotConfigured)?;
        Ok(format!("{}{}", base.trim_end_matches('/'), path))
    }

    fn authorized(&self, request: TracedRequest) -> TracedRequest {
        let token = self.config.api_token.expose_secret();
        if token.is_empty() {
            request
        } else {
            request.bearer_auth(token)
        }
    }

    /// POST a JSON body and decode the JSON reply regardless of HTTP status.
    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        phase: RenderPhase,
        path: &str,
        body: &Value,
    ) -> Result<T, RenderError> {
        let url = self.endpoint(path)?;

        let response = self
            .authorized(self.client.traced_post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| RenderError::Transport {
                phase,
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| RenderError::Transport {
            phase,
            message: e.to_string(),
        })?;

        tracing::debug!(phase = %phase, status = %status, "Renderer response received");

        serde_json::from_str(&text).map_err(|e| RenderError::Malformed {
            phase,
            message: format!("HTTP {}: {}", status, e),
        })
    }

    fn check_status(&self, phase: RenderPhase, status: Option<String>) -> Result<(), RenderError> {
        match status {
            Some(s) if s == self.config.success_status => Ok(()),
            other => Err(RenderError::Rejected {
                phase,
                status: other.unwrap_or_default(),
            }),
        }
    }

    /// Artifact URLs may point at storage outside the renderer; the token
    /// only goes to the renderer's own origin.
    fn is_renderer_origin(&self, url: &str) -> bool {
        let Some(base) = self.config.base_url.as_deref() else {
            return false;
        };
        match (reqwest::Url::parse(base), reqwest::Url::parse(url)) {
            (Ok(base), Ok(url)) => base.origin() == url.origin(),
            _ => false,
        }
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, RenderError> {
        let request = self.client.traced_get(url);
        let request = if self.is_renderer_origin(url) {
            self.authorized(request)
        } else {
            request
        };

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RenderError::Transport {
                phase: RenderPhase::Fetch,
                message: e.to_string(),
            })?;

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| RenderError::Transport {
                phase: RenderPhase::Fetch,
                message: e.to_string(),
            })
    }

    async fn render_inner(
        &self,
        request: &RenderRequest,
    ) -> Result<DocumentArtifacts, RenderError> {
        let skeleton: SkeletonResponse = self
            .post_json(
                RenderPhase::Skeleton,
                "/documents/skeleton",
                &json!({ "DocumentType": "Invoice" }),
            )
            .await?;
        self.check_status(RenderPhase::Skeleton, skeleton.status)?;

        let document = build_document(skeleton.document, request);
        let saved: SaveResponse = self
            .post_json(
                RenderPhase::Save,
                "/documents/save",
                &json!({ "Document": document, "Render": ["pdf", "xml"] }),
            )
            .await?;
        self.check_status(RenderPhase::Save, saved.status)?;

        let (Some(pdf_url), Some(xml_url)) = (saved.pdf_url, saved.xml_url) else {
            return Err(RenderError::Malformed {
                phase: RenderPhase::Save,
                message: "response is missing PdfUrl or XmlUrl".to_string(),
            });
        };

        let invoice_number = &request.invoice.invoice_number;
        let (pdf, xml) = tokio::join!(self.fetch_pdf(&pdf_url), self.fetch_xml(&xml_url));

        let pdf_content = match pdf {
            Ok(bytes) => Some(STANDARD.encode(bytes)),
            Err(e) => {
                RENDER_FAILURES_TOTAL.with_label_values(&["fetch"]).inc();
                tracing::warn!(invoice_number = %invoice_number, error = %e, "Failed to download rendered PDF");
                None
            }
        };
        let xml_content = match xml {
            Ok(text) => Some(text),
            Err(e) => {
                RENDER_FAILURES_TOTAL.with_label_values(&["fetch"]).inc();
                tracing::warn!(invoice_number = %invoice_number, error = %e, "Failed to download rendered XML");
                None
            }
        };

        Ok(DocumentArtifacts {
            pdf_url,
            xml_url,
            pdf_content,
            xml_content,
        })
    }
}

#[async_trait]
impl DocumentRenderer for ComplianceRenderer {
    #[tracing::instrument(skip(self, request), fields(invoice_number = %request.invoice.invoice_number))]
    async fn render(&self, request: &RenderRequest) -> Result<DocumentArtifacts, RenderError> {
        match self.render_inner(request).await {
            Ok(artifacts) => {
                tracing::info!(
                    pdf_url = %artifacts.pdf_url,
                    xml_url = %artifacts.xml_url,
                    "Invoice rendered"
                );
                Ok(artifacts)
            }
            Err(e) => {
                RENDER_FAILURES_TOTAL
                    .with_label_values(&[e.phase().as_str()])
                    .inc();
                tracing::warn!(phase = %e.phase(), error = %e, "Invoice rendering failed");
                Err(e)
            }
        }
    }

    async fn fetch_pdf(&self, url: &str) -> Result<Vec<u8>, RenderError> {
        self.get_bytes(url).await
    }

    async fn fetch_xml(&self, url: &str) -> Result<String, RenderError> {
        let bytes = self.get_bytes(url).await?;
        String::from_utf8(bytes).map_err(|e| RenderError::Malformed {
            phase: RenderPhase::Fetch,
            message: format!("XML is not valid UTF-8: {}", e),
        })
    }
}

fn party(
    name: &str,
    email: Option<&str>,
    street: Option<&str>,
    city: Option<&str>,
    postcode: Option<&str>,
    tax_number: Option<&str>,
) -> Value {
    json!({
        "Name": name,
        "Email": email,
        "Street": street,
        "City": city,
        "Postcode": postcode,
        "TaxNumber": tax_number,
    })
}

/// Populate the renderer's skeleton with the invoice. Keys already in the
/// skeleton are kept unless the invoice supplies a value for them.
pub fn build_document(skeleton: Value, request: &RenderRequest) -> Value {
    let invoice = &request.invoice;

    let seller = match &request.business {
        Some(b) => party(
            &b.name,
            b.email.as_deref(),
            b.street.as_deref(),
            b.city.as_deref(),
            b.postcode.as_deref(),
            b.tax_number.as_deref(),
        ),
        None => json!({}),
    };
    let buyer = party(
        &invoice.client_name,
        invoice.client_email.as_deref(),
        Some(&invoice.client_street),
        Some(&invoice.client_city),
        Some(&invoice.client_postcode),
        invoice.client_tax_number.as_deref(),
    );

    let lines: Vec<Value> = request
        .items
        .iter()
        .map(|item| {
            json!({
                "Position": item.position + 1,
                "Description": item.description,
                "Quantity": item.quantity,
                "UnitCode": DEFAULT_UNIT_CODE,
                "UnitPrice": item.unit_price,
                "TaxCode": item.tax_rate.normalize().to_string(),
                "TaxRate": item.tax_rate,
                "NetAmount": item.net_amount().map(|net| net.round_dp(2)),
            })
        })
        .collect();

    let issue_date = invoice.issue_date.map(|d| d.format("%Y-%m-%d").to_string());
    let due_date = invoice.due_date.map(|d| d.format("%Y-%m-%d").to_string());

    let patch = json!({
        "DocumentNumber": invoice.invoice_number,
        "IssueDate": issue_date,
        "DueDate": due_date,
        "Currency": invoice.currency,
        "Seller": seller,
        "Buyer": buyer,
        "Lines": lines,
        "Totals": {
            "Subtotal": invoice.subtotal,
            "Tax": invoice.tax,
            "Total": invoice.total,
        },
        "Payment": {
            "DueDate": due_date,
            "Terms": invoice.terms,
            "Iban": request.business.as_ref().and_then(|b| b.iban.clone()),
        },
        "Notes": invoice.notes,
    });

    let mut document = match skeleton {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };
    merge(&mut document, patch);
    document
}

fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    continue;
                }
                let nested = value.is_object() && target.get(&key).is_some_and(Value::is_object);
                if !nested {
                    target.insert(key, value);
                } else if let Some(existing) = target.get_mut(&key) {
                    merge(existing, value);
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn request() -> RenderRequest {
        let invoice_id = Uuid::new_v4();
        RenderRequest {
            invoice: Invoice {
                invoice_id,
                business_id: Uuid::new_v4(),
                contact_id: None,
                invoice_number: "INV-000007".to_string(),
                status: "draft".to_string(),
                client_name: "Acme GmbH".to_string(),
                client_email: None,
                client_street: "Main Street 1".to_string(),
                client_city: "Berlin".to_string(),
                client_postcode: "10115".to_string(),
                client_tax_number: Some("DE123".to_string()),
                currency: "EUR".to_string(),
                issue_date: NaiveDate::from_ymd_opt(2025, 3, 1),
                due_date: NaiveDate::from_ymd_opt(2025, 3, 31),
                subtotal: Decimal::from(100),
                tax: Decimal::from(10),
                total: Decimal::from(110),
                notes: None,
                terms: Some("Net 30".to_string()),
                pdf_url: None,
                xml_url: None,
                pdf_content: None,
                xml_content: None,
                sent_at: None,
                sent_method: None,
                sent_to: None,
                created_at: Utc::now(),
                updated_at: None,
            },
            items: vec![InvoiceItem {
                item_id: Uuid::new_v4(),
                invoice_id,
                description: "Widget".to_string(),
                quantity: Decimal::from(2),
                unit_price: Decimal::from(50),
                tax_rate: Decimal::new(1000, 2),
                position: 0,
                created_at: Utc::now(),
            }],
            business: Some(Business {
                business_id: Uuid::new_v4(),
                name: "Seller Ltd".to_string(),
                email: Some("office@seller.test".to_string()),
                street: None,
                city: Some("Hamburg".to_string()),
                postcode: None,
                tax_number: None,
                iban: Some("DE89370400440532013000".to_string()),
            }),
        }
    }

    #[test]
    fn document_keeps_skeleton_defaults() {
        let skeleton = json!({
            "Profile": "EN16931",
            "Notes": "template note",
            "Payment": { "Means": "58" },
        });
        let doc = build_document(skeleton, &request());

        assert_eq!(doc["Profile"], "EN16931");
        assert_eq!(doc["Notes"], "template note");
        assert_eq!(doc["Payment"]["Means"], "58");
        assert_eq!(doc["Payment"]["Iban"], "DE89370400440532013000");
        assert_eq!(doc["Payment"]["Terms"], "Net 30");
    }

    #[test]
    fn document_maps_lines_one_to_one() {
        let doc = build_document(json!({}), &request());

        assert_eq!(doc["DocumentNumber"], "INV-000007");
        assert_eq!(doc["IssueDate"], "2025-03-01");
        assert_eq!(doc["Buyer"]["Name"], "Acme GmbH");
        assert_eq!(doc["Seller"]["Name"], "Seller Ltd");

        let lines = doc["Lines"].as_array().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["Position"], 1);
        assert_eq!(lines[0]["UnitCode"], "C62");
        assert_eq!(lines[0]["TaxCode"], "10");
    }

    #[test]
    fn non_object_skeleton_is_replaced() {
        let doc = build_document(Value::Null, &request());
        assert!(doc.is_object());
        assert_eq!(doc["Currency"], "EUR");
    }

    fn config(base_url: Option<String>) -> RendererConfig {
        RendererConfig {
            base_url,
            api_token: secrecy::Secret::new(String::new()),
            success_status: "OK".to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn unconfigured_renderer_fails_in_skeleton_phase() {
        let renderer = ComplianceRenderer::new(config(None)).unwrap();

        let err = renderer.render(&request()).await.unwrap_err();

        assert!(matches!(err, RenderError::NotConfigured));
        assert_eq!(err.phase(), RenderPhase::Skeleton);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_urls_without_content() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/documents/skeleton"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "Status": "OK", "Document": {} })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/documents/save"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Status": "OK",
                "PdfUrl": format!("{}/missing.pdf", server.uri()),
                "XmlUrl": format!("{}/doc.xml", server.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/doc.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<Invoice/>"))
            .mount(&server)
            .await;

        let renderer = ComplianceRenderer::new(config(Some(server.uri()))).unwrap();
        let artifacts = renderer.render(&request()).await.unwrap();

        assert!(artifacts.pdf_url.ends_with("/missing.pdf"));
        assert_eq!(artifacts.pdf_content, None);
        assert_eq!(artifacts.xml_content.as_deref(), Some("<Invoice/>"));
    }

    #[tokio::test]
    async fn save_without_urls_is_malformed() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/documents/skeleton"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "Status": "OK", "Document": {} })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/documents/save"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "Status": "OK" })))
            .mount(&server)
            .await;

        let renderer = ComplianceRenderer::new(config(Some(server.uri()))).unwrap();
        let err = renderer.render(&request()).await.unwrap_err();

        assert!(matches!(err, RenderError::Malformed { phase: RenderPhase::Save, .. }));
    }

    #[test]
    fn token_scoped_to_renderer_origin() {
        let renderer =
            ComplianceRenderer::new(config(Some("https://render.test/api".to_string()))).unwrap();

        assert!(renderer.is_renderer_origin("https://render.test/files/a.pdf"));
        assert!(!renderer.is_renderer_origin("https://cdn.test/a.pdf"));
        assert!(!renderer.is_renderer_origin("http://render.test/files/a.pdf"));
        assert!(!renderer.is_renderer_origin("not a url"));
    }

    #[tokio::test]
    async fn foreign_artifact_host_gets_no_token() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let api = MockServer::start().await;
        let storage = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/documents/skeleton"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "Status": "OK", "Document": {} })),
            )
            .mount(&api)
            .await;
        Mock::given(method("POST"))
            .and(path("/documents/save"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Status": "OK",
                "PdfUrl": format!("{}/a.pdf", storage.uri()),
                "XmlUrl": format!("{}/a.xml", storage.uri()),
            })))
            .mount(&api)
            .await;
        Mock::given(method("GET"))
            .and(path("/a.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
            .mount(&storage)
            .await;
        Mock::given(method("GET"))
            .and(path("/a.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<Invoice/>"))
            .mount(&storage)
            .await;

        let mut cfg = config(Some(api.uri()));
        cfg.api_token = secrecy::Secret::new("secret-token".to_string());
        let renderer = ComplianceRenderer::new(cfg).unwrap();

        let artifacts = renderer.render(&request()).await.unwrap();
        assert!(artifacts.pdf_content.is_some());
        assert_eq!(artifacts.xml_content.as_deref(), Some("<Invoice/>"));

        let downloads = storage.received_requests().await.unwrap_or_default();
        assert_eq!(downloads.len(), 2);
        assert!(downloads
            .iter()
            .all(|r| !r.headers.contains_key("authorization")));
    }
}
