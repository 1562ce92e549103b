use std::time::Instant;

use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::error;

use crate::logger::environment_name;
use crate::server::dtos::health_dto::{
    HealthResponse, HealthStatus, SandboxHealth, ServiceHealthDetails,
};
use crate::server::services::app_services::AppServices;
use crate::server::{get_app_version, get_uptime_seconds};

const SLOW_RUNTIME_MS: f64 = 2000.0;

/// health endpoint - the only dependency worth probing is the sandbox runtime, without it no
/// obfuscated page can be resolved
pub async fn health_endpoint(
    Extension(services): Extension<AppServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let sandbox_health = check_sandbox_health(&services).await;

    let overall_status = sandbox_health.status;

    let response = HealthResponse {
        status: overall_status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: environment_name(services.config.cargo_env).to_string(),
        services: ServiceHealthDetails {
            sandbox: sandbox_health,
        },
    };

    let http_status = match overall_status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}

async fn check_sandbox_health(services: &AppServices) -> SandboxHealth {
    let start = Instant::now();

    match services.sandbox.runtime_version().await {
        Ok(version) => {
            let response_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            // a runtime this slow to start will eat most of the sandbox timeout
            let status = if response_time_ms > SLOW_RUNTIME_MS {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };
            SandboxHealth {
                status,
                runtime: Some(version),
                response_time_ms,
            }
        }
        Err(e) => {
            error!("Sandbox health check failed: {}", e);
            SandboxHealth {
                status: HealthStatus::Unhealthy,
                runtime: None,
                response_time_ms: 0.0,
            }
        }
    }
}
