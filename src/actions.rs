use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::controller_summaries_repo::ControllerSummaryFilter;
use crate::flight_summaries_repo::FlightSummaryFilter;
use crate::web::AppState;

/// Live tables are expected to be fresher than this (minutes).
const LIVE_FRESHNESS_MINUTES: i64 = 5;
/// Summary tables are expected to be fresher than this (hours).
const SUMMARY_FRESHNESS_HOURS: i64 = 2;

pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("API request failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal server error" })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    last_ingest: Option<DateTime<Utc>>,
    live_data_fresh: bool,
    summaries_fresh: bool,
    dead_jobs: Vec<&'static str>,
    counts: StatusCounts,
}

#[derive(Serialize)]
struct StatusCounts {
    flights: i64,
    controllers: i64,
    transceivers: i64,
    flight_summaries: i64,
    controller_summaries: i64,
}

pub async fn get_status(State(state): State<AppState>) -> Result<Response, ApiError> {
    let now = Utc::now();
    let last_ingest = state.last_ingest.read().ok().and_then(|guard| *guard);

    let live_data_fresh =
        last_ingest.is_some_and(|t| now - t < chrono::Duration::minutes(LIVE_FRESHNESS_MINUTES));
    let newest_summary = state
        .flight_summaries_repo
        .newest_completion_time()
        .await?
        .max(state.controller_summaries_repo.newest_session_end().await?);
    // Summaries trail live data by design; an empty system is still fresh.
    let summaries_fresh =
        newest_summary.is_none_or(|t| now - t < chrono::Duration::hours(SUMMARY_FRESHNESS_HOURS));

    let counts = StatusCounts {
        flights: state.flights_repo.count().await?,
        controllers: state.controllers_repo.count().await?,
        transceivers: state.transceivers_repo.count().await?,
        flight_summaries: state.flight_summaries_repo.count().await?,
        controller_summaries: state.controller_summaries_repo.count().await?,
    };

    let healthy = state.job_health.is_healthy() && live_data_fresh;
    let body = StatusResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        last_ingest,
        live_data_fresh,
        summaries_fresh,
        dead_jobs: state.job_health.dead_jobs(),
        counts,
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((code, Json(body)).into_response())
}

pub async fn get_flights(State(state): State<AppState>) -> Result<Response, ApiError> {
    let flights = state.flights_repo.latest_samples().await?;
    Ok(Json(flights).into_response())
}

pub async fn get_controllers(State(state): State<AppState>) -> Result<Response, ApiError> {
    let controllers = state.controllers_repo.live_connections().await?;
    Ok(Json(controllers).into_response())
}

pub async fn get_transceivers(State(state): State<AppState>) -> Result<Response, ApiError> {
    let transceivers = state.transceivers_repo.latest_samples().await?;
    Ok(Json(transceivers).into_response())
}

#[derive(Debug, Deserialize)]
pub struct FlightSummaryQuery {
    pub callsign: Option<String>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub completed_after: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

pub async fn get_flight_summaries(
    State(state): State<AppState>,
    Query(query): Query<FlightSummaryQuery>,
) -> Result<Response, ApiError> {
    let filter = FlightSummaryFilter {
        callsign: query.callsign,
        departure: query.departure,
        arrival: query.arrival,
        completed_after: query.completed_after,
        limit: query.limit.unwrap_or(100).clamp(1, 1000),
    };
    let summaries = state.flight_summaries_repo.list(filter).await?;
    Ok(Json(summaries).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ControllerSummaryQuery {
    pub callsign: Option<String>,
    pub cid: Option<i32>,
    pub ended_after: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

pub async fn get_controller_summaries(
    State(state): State<AppState>,
    Query(query): Query<ControllerSummaryQuery>,
) -> Result<Response, ApiError> {
    let filter = ControllerSummaryFilter {
        callsign: query.callsign,
        cid: query.cid,
        ended_after: query.ended_after,
        limit: query.limit.unwrap_or(100).clamp(1, 1000),
    };
    let summaries = state.controller_summaries_repo.list(filter).await?;
    Ok(Json(summaries).into_response())
}

pub async fn get_filter_status(State(state): State<AppState>) -> Response {
    Json(json!({
        "boundary_filter_enabled": state.config.enable_boundary_filter,
        "flight_plan_validation_enabled": state.config.flight_plan_validation_enabled,
        "sector_tracking_enabled": state.config.sector_tracking_enabled,
        "sector_count": state.reference.sectors.as_ref().map_or(0, |s| s.len()),
        "controller_allowlist_size":
            state.reference.controller_allowlist.as_ref().map(|l| l.len()),
        "icao_state_mappings": state.reference.icao_states.len(),
    }))
    .into_response()
}
