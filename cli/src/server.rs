use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

use rollin_core::error::WriteFailure;
use rollin_core::models::{
    DayKey, DerivedHistory, EntityKey, EntityKind, FieldValue, Snapshot, WriteAck,
};
use rollin_core::store::LocalStore;

const BODY_LIMIT: usize = 64 * 1024; // 64 KB
const MAX_HISTORY_DAYS: u32 = 365;

#[derive(Clone)]
struct AppState {
    store: LocalStore,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct WriteFieldRequest {
    value: FieldValue,
}

#[derive(Deserialize)]
struct ProtocolRequest {
    foods: Vec<String>,
}

#[derive(Deserialize)]
struct PlanRequest {
    exercises: Vec<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    days: Option<u32>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<WriteFailure> for ApiError {
    fn from(failure: WriteFailure) -> Self {
        match failure {
            WriteFailure::Permanent {
                status: 404,
                message,
            } => Self::NotFound(message),
            WriteFailure::Permanent { message, .. } => Self::BadRequest(message),
            WriteFailure::Transient(message) => Self::Internal(anyhow!(message)),
        }
    }
}

fn parse_day(date: &str) -> Result<DayKey, ApiError> {
    date.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{date}'. Use YYYY-MM-DD")))
}

fn parse_kind(entity: &str) -> Result<EntityKind, ApiError> {
    entity
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown entity '{entity}'")))
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let response = next.run(request).await;
    info!(%method, %path, %request_id, status = response.status().as_u16(), "handled request");
    response
}

// --- Handlers ---

async fn get_snapshot(
    State(state): State<AppState>,
    Path((date, entity)): Path<(String, String)>,
) -> Result<Json<Snapshot>, ApiError> {
    let key = EntityKey::new(parse_day(&date)?, parse_kind(&entity)?);
    let snapshot = state.store.snapshot(key)?;
    Ok(Json(snapshot))
}

async fn write_field(
    State(state): State<AppState>,
    Path((date, entity, field)): Path<(String, String, String)>,
    Json(req): Json<WriteFieldRequest>,
) -> Result<Json<WriteAck>, ApiError> {
    let key = EntityKey::new(parse_day(&date)?, parse_kind(&entity)?);
    let ack = state.store.write(key, &field, req.value)?;
    Ok(Json(ack))
}

async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<DerivedHistory>, ApiError> {
    let days = query.days.unwrap_or(30);
    if days == 0 || days > MAX_HISTORY_DAYS {
        return Err(ApiError::BadRequest(format!(
            "days must be between 1 and {MAX_HISTORY_DAYS}"
        )));
    }
    let history = state.store.history(days, DayKey::today())?;
    Ok(Json(history))
}

async fn set_protocol(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Json(req): Json<ProtocolRequest>,
) -> Result<StatusCode, ApiError> {
    let day = parse_day(&date)?;
    state
        .store
        .set_protocol(day, &req.foods)
        .map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_workout_plan(
    State(state): State<AppState>,
    Path(date): Path<String>,
    Json(req): Json<PlanRequest>,
) -> Result<StatusCode, ApiError> {
    let day = parse_day(&date)?;
    state
        .store
        .set_workout_plan(day, &req.exercises)
        .map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Router ---

pub(crate) fn build_router(store: LocalStore) -> Router {
    let state = AppState { store };
    Router::new()
        .route("/api/days/{date}/protocol", put(set_protocol))
        .route("/api/days/{date}/plan", put(set_workout_plan))
        .route("/api/days/{date}/{entity}", get(get_snapshot))
        .route("/api/days/{date}/{entity}/fields/{field}", put(write_field))
        .route("/api/history", get(get_history))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(store: LocalStore, port: u16, bind: &str) -> anyhow::Result<()> {
    let app = build_router(store);

    if bind != "127.0.0.1" && bind != "localhost" {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
