use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use physio_flow::{
    AnswerValue, AssessmentError, AssessmentRunner, AssessmentSession, AssessmentStep, Catalog,
    InMemorySessionStorage, SessionStorage,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    runner: AssessmentRunner,
}

#[derive(Debug, Deserialize)]
struct AssessmentRequest {
    session_id: Option<String>,
    question_id: Option<String>,
    answer: Option<AnswerValue>,
}

#[derive(Debug, Serialize)]
struct AssessmentResponse {
    session_id: String,
    step: AssessmentStep,
}

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "assessment_service=debug,physio_flow=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            // Structured JSON logging for production
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    request.headers_mut().insert(
        "x-correlation-id",
        HeaderValue::from_str(&correlation_id).unwrap(),
    );

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

#[tokio::main]
async fn main() {
    init_tracing();

    let knowledge_dir =
        std::env::var("KNOWLEDGE_DIR").unwrap_or_else(|_| "knowledge".to_string());
    let catalog = match Catalog::load_from_dir(&knowledge_dir).await {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            error!(knowledge_dir = %knowledge_dir, error = %e, "Failed to load knowledge catalog");
            std::process::exit(1);
        }
    };

    let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
    let app_state = AppState {
        runner: AssessmentRunner::new(catalog, storage),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/assessment", post(assessment))
        .route("/session/{id}", get(get_session))
        .route("/session/{id}/reset", post(reset_session))
        .layer(from_fn(correlation_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();

    info!("Server running on http://{bind_addr}");

    axum::serve(listener, app).await.unwrap();
}

async fn health_check() -> &'static str {
    "OK"
}

fn status_for(error: &AssessmentError) -> StatusCode {
    match error {
        AssessmentError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        AssessmentError::QuestionNotFound(_)
        | AssessmentError::QuestionAlreadyAnswered(_)
        | AssessmentError::AssessmentComplete(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// One interview round trip: start a session when none is given, record
/// an answer when one is, otherwise re-serve the current step.
async fn assessment(
    State(state): State<AppState>,
    Json(request): Json<AssessmentRequest>,
) -> Result<Json<AssessmentResponse>, StatusCode> {
    info!(
        session_id = ?request.session_id,
        question_id = ?request.question_id,
        "Processing assessment request"
    );

    let Some(session_id) = request.session_id else {
        let (session_id, step) = state.runner.start().await.map_err(|e| {
            error!(error = %e, "Failed to start session");
            status_for(&e)
        })?;
        info!(session_id = %session_id, "Created new session");
        return Ok(Json(AssessmentResponse { session_id, step }));
    };

    if Uuid::parse_str(&session_id).is_err() {
        error!(session_id = %session_id, "Invalid session ID format");
        return Err(StatusCode::BAD_REQUEST);
    }

    let step = match (request.question_id, request.answer) {
        (Some(question_id), Some(answer)) => state
            .runner
            .answer(&session_id, &question_id, answer)
            .await
            .map_err(|e| {
                error!(session_id = %session_id, question_id = %question_id, error = %e, "Failed to record answer");
                status_for(&e)
            })?,
        (None, None) => state.runner.current(&session_id).await.map_err(|e| {
            error!(session_id = %session_id, error = %e, "Failed to serve current step");
            status_for(&e)
        })?,
        _ => {
            error!(session_id = %session_id, "question_id and answer must be provided together");
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    Ok(Json(AssessmentResponse { session_id, step }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<AssessmentSession>, StatusCode> {
    info!(session_id = %session_id, "Getting session");
    match state.runner.session(&session_id).await {
        Ok(session) => Ok(Json(session)),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to get session");
            Err(status_for(&e))
        }
    }
}

async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<AssessmentResponse>, StatusCode> {
    info!(session_id = %session_id, "Resetting session");
    let step = state.runner.reset(&session_id).await.map_err(|e| {
        error!(session_id = %session_id, error = %e, "Failed to reset session");
        status_for(&e)
    })?;
    Ok(Json(AssessmentResponse { session_id, step }))
}
