use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use affiliate_ledger::LedgerStore;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    cache::{AppCaches, spawn_cache_sweeper},
    config::{AppConfig, ServerConfig},
    handlers, middleware as app_middleware,
    services::{AffiliateService, HealthService, MetricsService, TransactionRelay},
};

/// Shared handles threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ledger: Arc<LedgerStore>,
    pub caches: Arc<AppCaches>,
    pub affiliates: AffiliateService,
    pub relay: TransactionRelay,
    pub health: HealthService,
    pub metrics: MetricsService,
}

impl AppState {
    /// Opens the ledger and wires the services together.
    pub fn new(cfg: AppConfig) -> anyhow::Result<Self> {
        let ledger = Arc::new(LedgerStore::open(&cfg.affiliate.data_file_path));
        Self::with_ledger(cfg, ledger)
    }

    /// Same as [`AppState::new`] over an already opened ledger.
    pub fn with_ledger(cfg: AppConfig, ledger: Arc<LedgerStore>) -> anyhow::Result<Self> {
        let caches = Arc::new(AppCaches::new(&cfg.cache));
        let http = reqwest::Client::builder()
            .user_agent(concat!("affiliate-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let external = cfg.external_service.clone();

        let affiliates = AffiliateService::new(ledger.clone(), caches.clone(), external.clone());
        let relay = TransactionRelay::new(
            http.clone(),
            external.clone(),
            &cfg.affiliate,
            affiliates.clone(),
        );
        let health = HealthService::new(
            ledger.clone(),
            caches.clone(),
            http,
            external,
            cfg.cache.health_probe_timeout(),
        );
        let metrics = MetricsService::new(ledger.clone(), caches.clone());

        Ok(Self {
            config: Arc::new(cfg),
            ledger,
            caches,
            affiliates,
            relay,
            health,
            metrics,
        })
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    let cors = cors_layer(&state.config.server);

    Router::new()
        .route("/", get(handlers::root))
        // Affiliate operations
        .route("/affiliates/register", post(handlers::register_affiliate))
        .route("/affiliates/{affiliate_id}", get(handlers::get_affiliate))
        .route("/affiliate_buy_tokens", post(handlers::affiliate_buy_tokens))
        .route("/record_commission", post(handlers::record_commission))
        // Monitoring
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/metrics/prometheus", get(handlers::prometheus_metrics))
        // Cache administration
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/clear", post(handlers::cache_clear))
        .route("/cache/cleanup", post(handlers::cache_cleanup))
        .with_state(state)
        // Middleware stack (outermost first: request id -> metrics -> trace -> cors/compression -> body limit)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(app_middleware::request_id))
                .layer(middleware::from_fn(app_middleware::track_metrics))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let req_id = req
                                .extensions()
                                .get::<HeaderValue>()
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("")
                                .to_string();
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.status_code = Empty,
                                request_id = %req_id
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(cors)
                .layer(CompressionLayer::new())
                .layer(axum::extract::DefaultBodyLimit::max(body_limit)),
        )
}

fn cors_layer(cfg: &ServerConfig) -> CorsLayer {
    let wildcard = |values: &[String]| values.iter().any(|v| v == "*");

    let origins = if wildcard(&cfg.cors_origins) {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(parse_all::<HeaderValue>(&cfg.cors_origins, "origin"))
    };
    let methods = if wildcard(&cfg.cors_methods) {
        AllowMethods::any()
    } else {
        AllowMethods::list(parse_all::<Method>(&cfg.cors_methods, "method"))
    };
    let headers = if wildcard(&cfg.cors_headers) {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(parse_all::<HeaderName>(&cfg.cors_headers, "header"))
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .max_age(Duration::from_secs(3600))
}

fn parse_all<T: std::str::FromStr>(values: &[String], kind: &str) -> Vec<T> {
    values
        .iter()
        .filter_map(|v| match v.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(value = %v, kind, "Ignoring invalid CORS entry");
                None
            }
        })
        .collect()
}

pub struct AffiliateServer {
    addr: SocketAddr,
    app: Router,
    caches: Arc<AppCaches>,
    cleanup_interval: Duration,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn build(self) -> anyhow::Result<AffiliateServer> {
        let cleanup_interval = Duration::from_secs(self.config.cache.cleanup_interval_secs);
        let state = AppState::new(self.config)?;
        let caches = state.caches.clone();
        let app = build_app(state);

        Ok(AffiliateServer {
            addr: self.addr,
            app,
            caches,
            cleanup_interval,
        })
    }
}

impl AffiliateServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let sweeper = spawn_cache_sweeper(self.caches, self.cleanup_interval);
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        if let Some(handle) = sweeper {
            handle.abort();
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
