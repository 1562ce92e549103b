pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    Extension, Router, ServiceExt,
    extract::Request,
    http::{HeaderValue, Method, header},
    routing::get,
};
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::{
    cors::{Any, CorsLayer},
    normalize_path::NormalizePathLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::AppConfig;

use self::{
    api::{
        anime_controller::AnimeController, health_controller::health_endpoint,
        proxy_controller::ProxyController,
    },
    services::app_services::AppServices,
};

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub struct ApplicationServer;

impl ApplicationServer {
    /// the full route table on top of the given services, no listener attached
    pub fn router(services: AppServices) -> Router {
        let cors = Self::cors_layer(&services.config.cors_origin);
        let relay_route = services.config.relay_route.clone();

        Router::new()
            .merge(AnimeController::app())
            .route("/health", get(health_endpoint))
            .merge(ProxyController::app(&relay_route))
            .layer(Extension(services))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    pub async fn serve(config: Arc<AppConfig>) -> anyhow::Result<()> {
        Lazy::force(&START_TIME);

        let services = AppServices::new(config.clone()).context("could not build services")?;

        match services.sandbox.runtime_version().await {
            Ok(version) => info!("sandbox runtime {} ok", version),
            // not fatal, catalog routes and the relay still work without it
            Err(e) => warn!("sandbox runtime unavailable, /m3u8 will fail: {}", e),
        }

        let app = NormalizePathLayer::trim_trailing_slash().layer(Self::router(services));

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("could not bind {}", addr))?;

        info!("routes initialized, listening on port {}", config.port);

        axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("error while starting API server")?;

        Ok(())
    }

    fn cors_layer(cors_origin: &str) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::RANGE, header::CONTENT_TYPE])
            .expose_headers([
                header::CONTENT_LENGTH,
                header::CONTENT_RANGE,
                header::ACCEPT_RANGES,
            ]);

        if cors_origin.trim() == "*" {
            return layer.allow_origin(Any);
        }

        let origins = cors_origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("ignoring invalid cors origin '{}'", o);
                    None
                }
            })
            .collect::<Vec<_>>();

        layer.allow_origin(origins)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, draining connections");
}
