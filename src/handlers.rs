// handlers.rs

use crate::{
    docs::ApiDoc,
    error::{AppError, UNEXPECTED_ERROR},
    models::{
        AppState, Bulb, BulbId, BulbListResponse, ControlRequest, HealthResponse, HouseFilter,
        HouseId, MessageResponse,
    },
};
use axum::{
    Json, Router,
    extract::{
        OriginalUri, Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::Value;
use std::{any::Any, sync::Arc};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;
use utoipa::OpenApi;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/bulbs", get(list_bulbs).post(control_bulbs))
        .route("/api/bulb/{id}", post(control_bulb))
        .route("/api-doc/openapi.json", get(openapi))
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bulbs targeted by an optional `house` filter. An empty filter means every bulb.
fn scope<'a>(
    state: &'a AppState,
    filter: &HouseFilter,
) -> Result<(Option<HouseId>, Vec<&'a Bulb>), AppError> {
    let Some(raw) = filter.house.as_deref().filter(|raw| !raw.is_empty()) else {
        return Ok((None, state.catalog.bulbs().iter().collect()));
    };

    raw.trim()
        .parse::<HouseId>()
        .ok()
        .and_then(|house| Some((Some(house), state.catalog.house_bulbs(house)?)))
        .ok_or_else(|| AppError::HouseNotFound(raw.to_string()))
}

/// Reads the `house` filter from the query string. A repeated key keeps its first value.
fn house_filter(
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<HouseFilter, AppError> {
    let Query(pairs) = query.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let house = pairs
        .into_iter()
        .find_map(|(key, value)| (key == "house").then_some(value));
    Ok(HouseFilter { house })
}

fn read_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    body.map(|Json(raw)| raw)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

async fn dispatch(state: &AppState, targets: &[BulbId], raw: &Value) -> Result<(), AppError> {
    let report = state.dispatcher.dispatch(targets, raw).await?;
    if report.is_success() {
        return Ok(());
    }

    let failed = report.failed();
    let ids = failed
        .iter()
        .map(BulbId::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Err(AppError::Dispatch {
        message: format!("The control instruction could not be delivered to bulb(s) {ids}."),
        failed,
    })
}

#[utoipa::path(
    get,
    path = "/api/bulbs",
    params(HouseFilter),
    responses(
        (status = 200, description = "Configured bulbs with their current state", body = BulbListResponse),
        (status = 404, description = "Unknown house", body = MessageResponse)
    )
)]
pub async fn list_bulbs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<BulbListResponse>, AppError> {
    let (_, bulbs) = scope(&state, &house_filter(query)?)?;
    let bulbs = bulbs
        .into_iter()
        .map(|bulb| state.store.view(bulb))
        .collect::<Result<Vec<_>, _>>()
        .map_err(anyhow::Error::from)?;

    Ok(Json(BulbListResponse {
        success: true,
        bulbs,
    }))
}

#[utoipa::path(
    post,
    path = "/api/bulbs",
    params(HouseFilter),
    request_body = ControlRequest,
    responses(
        (status = 200, description = "Instruction queued for every bulb in scope", body = MessageResponse),
        (status = 400, description = "Invalid instruction", body = MessageResponse),
        (status = 404, description = "Unknown house", body = MessageResponse),
        (status = 503, description = "Some bulbs could not be reached", body = MessageResponse)
    )
)]
pub async fn control_bulbs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let (house, bulbs) = scope(&state, &house_filter(query)?)?;
    let raw = read_body(body)?;
    let targets: Vec<BulbId> = bulbs.iter().map(|bulb| bulb.id).collect();

    dispatch(&state, &targets, &raw).await?;

    let message = match house {
        Some(house) => format!(
            "A control instruction for all bulbs in house {house} has been added to the respective RabbitMQ queue."
        ),
        None => "A control instruction for all bulbs has been added to the respective RabbitMQ queues."
            .to_string(),
    };
    Ok(Json(MessageResponse::ok(message)))
}

#[utoipa::path(
    post,
    path = "/api/bulb/{id}",
    params(("id" = u32, Path, description = "Bulb id")),
    request_body = ControlRequest,
    responses(
        (status = 200, description = "Instruction queued", body = MessageResponse),
        (status = 400, description = "Invalid instruction", body = MessageResponse),
        (status = 404, description = "Unknown bulb", body = MessageResponse),
        (status = 503, description = "Bulb could not be reached", body = MessageResponse)
    )
)]
pub async fn control_bulb(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let id: BulbId = id
        .parse()
        .map_err(|_| AppError::RouteNotFound(uri.path().to_string()))?;
    if state.catalog.bulb(id).is_none() {
        return Err(AppError::BulbNotFound(id));
    }
    let raw = read_body(body)?;

    dispatch(&state, &[id], &raw).await?;

    Ok(Json(MessageResponse::ok(format!(
        "A control instruction for bulb {id} has been added to the respective RabbitMQ queue."
    ))))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service and broker status", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        broker: state.publisher.state().to_string(),
    })
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn route_not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::RouteNotFound(uri.path().to_string())
}

async fn method_not_allowed(method: Method, OriginalUri(uri): OriginalUri) -> AppError {
    AppError::MethodNotAllowed {
        path: uri.path().to_string(),
        method,
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    error!(panic = %detail, "Request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(MessageResponse::error(UNEXPECTED_ERROR)),
    )
        .into_response()
}
