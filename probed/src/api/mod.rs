//! HTTP API handlers for probed

pub mod health;
pub mod metrics;
pub mod source_ip;
pub mod types;

pub use health::health_routes;
pub use metrics::metric_routes;
