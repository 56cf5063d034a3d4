use secrecy::Secret;
use service_core::config::{self as core_config, get_env, get_flag, is_production};
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct InvoicingConfig {
    pub common: core_config::Config,
    pub database: DatabaseConfig,
    pub numbering: NumberingConfig,
    /// Default invoice currency when a request omits one.
    pub currency: String,
    pub renderer: RendererConfig,
    pub smtp: SmtpConfig,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "Unknown STORE_BACKEND '{}', expected postgres or memory",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct NumberingConfig {
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Unset disables rendering; every create and edit then carries a warning.
    pub base_url: Option<String>,
    pub api_token: Secret<String>,
    /// `Status` value the renderer reports on success.
    pub success_status: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

impl InvoicingConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = is_production();

        let backend = StoreBackend::parse(&get_env("STORE_BACKEND", Some("postgres"), false)?)?;
        let database_url = match backend {
            StoreBackend::Postgres => get_env("DATABASE_URL", None, is_prod)?,
            StoreBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
        };

        Ok(InvoicingConfig {
            common: common_config,
            database: DatabaseConfig {
                backend,
                url: Secret::new(database_url),
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"), false)?
                    .parse()
                    .unwrap_or(10),
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"), false)?
                    .parse()
                    .unwrap_or(1),
            },
            numbering: NumberingConfig {
                prefix: get_env("INVOICE_NUMBER_PREFIX", Some("INV-"), false)?,
            },
            currency: get_env("CURRENCY", Some("EUR"), false)?,
            renderer: RendererConfig {
                base_url: env::var("RENDERER_BASE_URL").ok().filter(|s| !s.is_empty()),
                api_token: Secret::new(get_env("RENDERER_API_TOKEN", Some(""), is_prod)?),
                success_status: get_env("RENDERER_SUCCESS_STATUS", Some("OK"), false)?,
                timeout_secs: get_env("RENDERER_TIMEOUT_SECS", Some("30"), false)?
                    .parse()
                    .unwrap_or(30),
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: get_env("SMTP_PORT", Some("587"), is_prod)?
                    .parse()
                    .unwrap_or(587),
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from_email: get_env("SMTP_FROM_EMAIL", Some("invoices@example.com"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("Invoicing"), false)?,
                enabled: get_flag("SMTP_ENABLED"),
            },
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
        })
    }
}
