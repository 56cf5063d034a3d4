pub mod identity;
pub mod metrics;

pub use identity::{CallerIdentity, USER_ID_HEADER};
pub use metrics::http_metrics_middleware;
