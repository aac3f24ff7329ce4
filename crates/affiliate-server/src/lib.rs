pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod services;

pub use cache::{AppCaches, CacheStats, TtlCache, spawn_cache_sweeper};
pub use config::{
    AffiliateConfig, AppConfig, CacheConfig, ExternalServiceConfig, LoggingConfig, ServerConfig,
};
pub use error::AffiliateError;
pub use observability::{LogLevelError, apply_logging_level, init_tracing};
pub use server::{AffiliateServer, AppState, ServerBuilder, build_app};
