use utoipa::OpenApi;
use crate::{handlers, models};

#[derive(OpenApi)]
#[openapi(
    info(title = "bulb-control", description = "Smart bulb control plane"),
    paths(
        handlers::list_bulbs,
        handlers::control_bulbs,
        handlers::control_bulb,
        handlers::health,
    ),
    components(
        schemas(
            models::BulbListResponse,
            models::MessageResponse,
            models::ControlRequest,
            models::HealthResponse,
            models::BulbState,
            models::PowerState,
        )
    )
)]
pub struct ApiDoc;
