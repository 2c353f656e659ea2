use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use steward_leadership::{HealthReport, LeadershipProbe};

pub(crate) struct AppState {
    pub(crate) probes: Vec<Arc<dyn LeadershipProbe>>,
}

#[derive(Serialize)]
struct HealthDto {
    status: &'static str,
    contenders: Vec<HealthReport>,
}

#[derive(Serialize)]
struct LeaderDto {
    leading: bool,
    contender: Option<String>,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/leader", get(leader_handler))
        .with_state(state)
}

/// 200 when every local contender is healthy, 503 otherwise.
async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthDto>) {
    let mut contenders = Vec::with_capacity(state.probes.len());
    for probe in &state.probes {
        contenders.push(probe.health().await);
    }

    let healthy = !contenders.is_empty() && contenders.iter().all(|report| report.healthy);
    let (code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (code, Json(HealthDto { status, contenders }))
}

/// 200 when a local contender leads, 503 otherwise.
async fn leader_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<LeaderDto>) {
    for probe in &state.probes {
        if probe.is_leading() {
            let report = probe.health().await;
            return (
                StatusCode::OK,
                Json(LeaderDto {
                    leading: true,
                    contender: Some(report.identity),
                }),
            );
        }
    }
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(LeaderDto {
            leading: false,
            contender: None,
        }),
    )
}
