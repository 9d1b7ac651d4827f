mod error;
pub use error::ApiError;

mod config;
pub use config::HubConfig;

mod hub;
pub use hub::{Hub, Viewer, ViewerSession};

mod monitor;
pub use monitor::{DEFAULT_HEALTH_INTERVAL, HealthMonitor};

mod http;
pub use http::HttpApi;

mod ws;

pub use axum;
