//! JSON API over the app state.

use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use waitline_core::{ErrorKind, QueueError, Region, TicketId, UserId};

use crate::app::AppState;

pub struct ApiError(QueueError);

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match self.0.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation"),
            ErrorKind::Unauthorized => (StatusCode::FORBIDDEN, "unauthorized"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
            ErrorKind::CooldownActive => (StatusCode::CONFLICT, "cooldown_active"),
        };
        let mut body = json!({
            "error": self.0.to_string(),
            "kind": kind,
        });
        if let QueueError::CooldownActive { days_remaining } = self.0 {
            body["daysRemaining"] = json!(days_remaining);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn parse_target(region: &str, user: &str) -> Result<(Region, UserId), ApiError> {
    Ok((region.parse()?, UserId::parse(user)?))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "waitline",
        "version": crate::get_version(),
    }))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<crate::status::StatusData> {
    Json(state.status(crate::get_version()).await)
}

async fn view_handler(State(state): State<Arc<AppState>>, Path(region): Path<String>) -> ApiResult {
    let region: Region = region.parse()?;
    Ok(Json(state.view(region).await).into_response())
}

async fn activate_reviewer(
    State(state): State<Arc<AppState>>,
    Path((region, user)): Path<(String, String)>,
) -> ApiResult {
    let (region, user) = parse_target(&region, &user)?;
    state.activate_reviewer(region, &user).await;
    Ok(Json(state.view(region).await).into_response())
}

async fn deactivate_reviewer(
    State(state): State<Arc<AppState>>,
    Path((region, user)): Path<(String, String)>,
) -> ApiResult {
    let (region, user) = parse_target(&region, &user)?;
    let changed = state.deactivate_reviewer(region, &user).await;
    Ok(Json(json!({ "changed": changed })).into_response())
}

async fn join_queue(
    State(state): State<Arc<AppState>>,
    Path((region, user)): Path<(String, String)>,
) -> ApiResult {
    let (region, user) = parse_target(&region, &user)?;
    let position = state.request_join(region, &user).await?;
    Ok((StatusCode::CREATED, Json(json!({ "position": position }))).into_response())
}

async fn leave_queue(
    State(state): State<Arc<AppState>>,
    Path((region, user)): Path<(String, String)>,
) -> ApiResult {
    let (region, user) = parse_target(&region, &user)?;
    let removed = state.leave_queue(region, &user).await;
    Ok(Json(json!({ "removed": removed })).into_response())
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    Path((region, user)): Path<(String, String)>,
) -> ApiResult {
    let (region, user) = parse_target(&region, &user)?;
    state.confirm_still_active(region, &user).await?;
    Ok(Json(json!({ "confirmed": true })).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinWaitlistRequest {
    user: String,
    region: String,
    #[serde(default)]
    preferred_target: String,
}

async fn join_waitlist(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JoinWaitlistRequest>,
) -> ApiResult {
    let (region, user) = parse_target(&request.region, &request.user)?;
    state
        .join_waitlist(&user, region, &request.preferred_target)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "joined": true }))).into_response())
}

async fn leave_waitlist(State(state): State<Arc<AppState>>, Path(user): Path<String>) -> ApiResult {
    let user = UserId::parse(&user)?;
    let removed = state.leave_waitlist(&user).await;
    Ok(Json(json!({
        "removed": removed.is_some(),
        "revoke": removed.map(|m| m.unlocked_resources).unwrap_or_default(),
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
struct TicketActionRequest {
    actor: String,
}

async fn cancel_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<TicketActionRequest>,
) -> ApiResult {
    let actor = UserId::parse(&request.actor)?;
    let ticket = state.cancel_ticket(&TicketId(id), &actor).await?;
    Ok(Json(json!({ "closed": ticket })).into_response())
}

async fn submit_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<TicketActionRequest>,
) -> ApiResult {
    let actor = UserId::parse(&request.actor)?;
    let submitted = state.submit_ticket(&TicketId(id), &actor).await?;
    Ok(Json(json!({
        "closed": submitted.ticket,
        "revoke": submitted.revoked,
        "cooldownUntil": submitted.cooldown_until,
    }))
    .into_response())
}

/// A handler panicked: the request gets a 500 and whatever is in memory is
/// saved, as for any other uncaught fault.
fn handle_panic(state: &Arc<AppState>, panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!("Request handler panicked: {}", detail);
    state.spawn_emergency_flush();
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error", "kind": "internal" })),
    )
        .into_response()
}

fn with_middleware(routes: Router<Arc<AppState>>, state: Arc<AppState>) -> Router {
    let panic_state = state.clone();
    let on_panic = move |panic: Box<dyn Any + Send + 'static>| handle_panic(&panic_state, panic);
    routes
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(on_panic)),
        )
        .with_state(state)
}

pub fn router(state: Arc<AppState>) -> Router {
    let routes = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .route("/regions/:region", get(view_handler))
        .route(
            "/regions/:region/reviewers/:user",
            post(activate_reviewer).delete(deactivate_reviewer),
        )
        .route(
            "/regions/:region/queue/:user",
            post(join_queue).delete(leave_queue),
        )
        .route("/regions/:region/confirm/:user", post(confirm))
        .route("/waitlist", post(join_waitlist))
        .route("/waitlist/:user", delete(leave_waitlist))
        .route("/tickets/:id/cancel", post(cancel_ticket))
        .route("/tickets/:id/submit", post(submit_ticket));
    with_middleware(routes, state)
}
