use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use fieldsync_core::models::{RawRecord, Snapshot};
use fieldsync_core::realtime::DataUpdate;
use fieldsync_core::sync::BatchAck;
use fieldsync_core::{EmployeeId, EntityKind, RealtimeEvent};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::authorize;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{employee_fingerprint, PushRateLimiter, RateLimitMetricsSnapshot};
use crate::realtime::{serve_socket, RealtimeBroker};
use crate::store::CanonicalStore;

// Receipt batches carry attachment references and grow past axum's 2 MB default.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: CanonicalStore,
    realtime: RealtimeBroker,
    push_rate_limiter: Arc<PushRateLimiter>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        Self {
            store: CanonicalStore::new(),
            realtime: RealtimeBroker::new(),
            push_rate_limiter: Arc::new(PushRateLimiter::from_config(config.as_ref())),
            config,
        }
    }

    pub const fn store(&self) -> &CanonicalStore {
        &self.store
    }

    pub const fn realtime(&self) -> &RealtimeBroker {
        &self.realtime
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/employees/{employee}/records/{kind}", put(push_records))
        .route("/employees/{employee}/snapshot", get(fetch_snapshot))
        .route("/realtime", get(realtime_socket))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    realtime_employees: usize,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        realtime_employees: state.realtime.active_employees().await,
        rate_limit: state.push_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(request.headers(), state.config.auth_token.as_deref())?;
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct PushRequest {
    records: Vec<RawRecord>,
}

async fn push_records(
    State(state): State<AppState>,
    Path((employee, kind)): Path<(String, String)>,
    Json(request): Json<PushRequest>,
) -> Result<Json<BatchAck>, AppError> {
    let employee = EmployeeId::new(employee)?;
    let kind: EntityKind = kind.parse()?;
    state.push_rate_limiter.check(employee.as_str()).await?;

    if request.records.len() > state.config.max_batch_records {
        return Err(AppError::bad_request(format!(
            "Batch of {} {kind} exceeds the limit of {}",
            request.records.len(),
            state.config.max_batch_records
        )));
    }

    let record_ids = request.records.iter().map(|record| record.id).collect();
    let accepted = state
        .store
        .replace(&employee, kind, request.records)
        .await?;

    let update = RealtimeEvent::DataUpdate(DataUpdate {
        kind: Some(kind),
        record_ids,
        changed_at: Some(Utc::now().timestamp_millis()),
    });
    let notified = state.realtime.publish(&employee, update).await;

    tracing::info!(
        endpoint = "push",
        employee = employee_fingerprint(employee.as_str()),
        kind = %kind,
        accepted,
        notified,
        "Replaced record set"
    );
    Ok(Json(BatchAck { accepted }))
}

async fn fetch_snapshot(
    State(state): State<AppState>,
    Path(employee): Path<String>,
) -> Result<Json<Snapshot>, AppError> {
    let employee = EmployeeId::new(employee)?;
    let snapshot = state.store.snapshot(&employee).await?;
    tracing::info!(
        endpoint = "snapshot",
        employee = employee_fingerprint(employee.as_str()),
        records = snapshot.len(),
        "Served snapshot"
    );
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct RealtimeQuery {
    employee_id: String,
}

async fn realtime_socket(
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let employee = EmployeeId::new(query.employee_id)?;
    let events = state.realtime.subscribe(&employee).await;
    let broker = state.realtime.clone();
    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, broker, employee, events)))
}
