use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::actions;
use crate::config::AppConfig;
use crate::controller_summaries_repo::ControllerSummariesRepository;
use crate::controllers_repo::ControllersRepository;
use crate::db::PgPool;
use crate::flight_summaries_repo::FlightSummariesRepository;
use crate::flights_repo::FlightsRepository;
use crate::ingest::SharedLastIngest;
use crate::reference_data::ReferenceData;
use crate::scheduler::JobHealth;
use crate::transceivers_repo::TransceiversRepository;

/// Shared state for the read-only API.
#[derive(Clone)]
pub struct AppState {
    pub flights_repo: FlightsRepository,
    pub controllers_repo: ControllersRepository,
    pub transceivers_repo: TransceiversRepository,
    pub flight_summaries_repo: FlightSummariesRepository,
    pub controller_summaries_repo: ControllerSummariesRepository,
    pub reference: Arc<ReferenceData>,
    pub config: Arc<AppConfig>,
    pub last_ingest: SharedLastIngest,
    pub job_health: JobHealth,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        reference: Arc<ReferenceData>,
        config: Arc<AppConfig>,
        last_ingest: SharedLastIngest,
        job_health: JobHealth,
    ) -> Self {
        Self {
            flights_repo: FlightsRepository::new(pool.clone()),
            controllers_repo: ControllersRepository::new(pool.clone()),
            transceivers_repo: TransceiversRepository::new(pool.clone()),
            flight_summaries_repo: FlightSummariesRepository::new(pool.clone()),
            controller_summaries_repo: ControllerSummariesRepository::new(pool),
            reference,
            config,
            last_ingest,
            job_health,
        }
    }
}

// Request logging with a short correlation id.
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);
    let response = next.run(request).await;
    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        response.status().as_u16(),
        start_time.elapsed().as_secs_f64() * 1000.0
    );
    response
}

pub fn build_router(state: AppState) -> Router {
    let api_router = Router::new()
        .route("/status", get(actions::get_status))
        .route("/flights", get(actions::get_flights))
        .route("/controllers", get(actions::get_controllers))
        .route("/transceivers", get(actions::get_transceivers))
        .route("/summaries/flights", get(actions::get_flight_summaries))
        .route("/summaries/controllers", get(actions::get_controller_summaries))
        .route("/filters/status", get(actions::get_filter_status))
        .with_state(state);

    Router::new()
        .nest("/api", api_router)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive())
}

pub async fn start_web_server(
    interface: String,
    port: u16,
    state: AppState,
    cancel: CancellationToken,
) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    Ok(())
}
