//! Application startup and lifecycle management.

use crate::config::{InvoicingConfig, StoreBackend};
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::services::{
    ComplianceRenderer, Database, DocumentRenderer, InMemoryStore, InvoiceOrchestrator,
    InvoiceStore, Mailer, SmtpMailer,
};
use axum::{
    middleware::from_fn,
    routing::{delete, get, post, put},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<InvoicingConfig>,
    pub store: Arc<dyn InvoiceStore>,
    pub orchestrator: InvoiceOrchestrator,
}

impl AppState {
    pub fn new(
        config: InvoicingConfig,
        store: Arc<dyn InvoiceStore>,
        renderer: Arc<dyn DocumentRenderer>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let orchestrator = InvoiceOrchestrator::new(
            store.clone(),
            renderer,
            mailer,
            &config.numbering.prefix,
            &config.currency,
        );

        Self {
            config: Arc::new(config),
            store,
            orchestrator,
        }
    }
}

/// Routes plus the middleware stack, without a listener.
pub fn build_router(state: AppState) -> Router {
    let invoices = Router::new()
        .route("/create", post(handlers::invoices::create_invoice))
        .route("/edit", put(handlers::invoices::edit_invoice))
        .route("/get", get(handlers::invoices::list_invoices))
        .route("/get/:id", get(handlers::invoices::get_invoice))
        .route("/delete/:id", delete(handlers::invoices::delete_invoice))
        .route("/:id/validate", post(handlers::invoices::validate_invoice))
        .route("/:id/send", post(handlers::invoices::send_invoice))
        .route("/:id/pdf", get(handlers::invoices::download_pdf))
        .route("/:id/xml", get(handlers::invoices::download_xml));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .nest("/invoices", invoices)
        .layer(from_fn(http_metrics_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

async fn build_store(config: &InvoicingConfig) -> Result<Arc<dyn InvoiceStore>, AppError> {
    match config.database.backend {
        StoreBackend::Postgres => {
            let db = Database::new(
                config.database.url.expose_secret(),
                config.database.max_connections,
                config.database.min_connections,
            )
            .await?;
            db.run_migrations().await?;
            Ok(Arc::new(db))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: InvoicingConfig) -> Result<Self, AppError> {
        let store = build_store(&config).await?;

        let renderer = ComplianceRenderer::new(config.renderer.clone())?;
        if renderer.is_configured() {
            tracing::info!("Compliance renderer client initialized");
        } else {
            tracing::warn!(
                "RENDERER_BASE_URL not set - invoices will be stored without compliance documents"
            );
        }

        let mailer = SmtpMailer::new(config.smtp.clone())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
        if mailer.is_enabled() {
            tracing::info!("SMTP mail transport initialized");
        } else {
            tracing::warn!("SMTP disabled - email delivery will be refused");
        }

        let port = config.common.port;
        let state = AppState::new(config, store, Arc::new(renderer), Arc::new(mailer));
        let router = build_router(state);

        // Port 0 binds a random port, used by tests
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Invoicing service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
