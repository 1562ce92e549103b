use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub version: String,
    pub environment: String,
    pub services: ServiceHealthDetails,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealthDetails {
    pub sandbox: SandboxHealth,
}

#[derive(Debug, Serialize)]
pub struct SandboxHealth {
    pub status: HealthStatus,
    pub runtime: Option<String>,
    pub response_time_ms: f64,
}
