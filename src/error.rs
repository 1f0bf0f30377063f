// error.rs
use crate::{
    commands::ValidationError,
    models::{BulbId, MessageResponse},
};
use axum::{
    Json,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Malformed request body: {0}")]
    BadRequest(String),
    #[error("Invalid bulb: {0} - bulb not found in configuration.")]
    BulbNotFound(BulbId),
    #[error("Invalid house: {0} - house not found in configuration.")]
    HouseNotFound(String),
    #[error("The route {0} does not exist.")]
    RouteNotFound(String),
    #[error("The route {path} does not allow the {method} method.")]
    MethodNotAllowed { path: String, method: Method },
    #[error("{message}")]
    Dispatch { message: String, failed: Vec<BulbId> },
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BulbNotFound(_) | Self::HouseNotFound(_) | Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Dispatch { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub const UNEXPECTED_ERROR: &str = "There was an unexpected server error.";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Internal(err) => {
                error!(error = ?err, "Unexpected error while handling request");
                MessageResponse::error(UNEXPECTED_ERROR)
            }
            Self::Dispatch { message, failed } => MessageResponse {
                success: false,
                message,
                failed: Some(failed),
            },
            other => MessageResponse::error(other.to_string()),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_each_kind_to_its_status() {
        let cases = [
            (AppError::from(ValidationError::MissingFields), StatusCode::BAD_REQUEST),
            (AppError::BadRequest("eof".into()), StatusCode::BAD_REQUEST),
            (AppError::BulbNotFound(3), StatusCode::NOT_FOUND),
            (AppError::HouseNotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::RouteNotFound("/nope".into()), StatusCode::NOT_FOUND),
            (
                AppError::MethodNotAllowed {
                    path: "/api/bulb/1".into(),
                    method: Method::GET,
                },
                StatusCode::METHOD_NOT_ALLOWED,
            ),
            (
                AppError::Dispatch {
                    message: "down".into(),
                    failed: vec![1],
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AppError::from(anyhow::anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn messages_match_the_public_api() {
        assert_eq!(
            AppError::MethodNotAllowed {
                path: "/api/bulb/1".into(),
                method: Method::GET
            }
            .to_string(),
            "The route /api/bulb/1 does not allow the GET method."
        );
        assert_eq!(
            AppError::from(ValidationError::MissingFields).to_string(),
            "Missing state, brightness, or color."
        );
    }
}
