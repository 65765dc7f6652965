use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::order::OrderError;

/// Any handler failure. Domain errors keep their meaning; the rest is a 500.
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<OrderError>() {
            Some(OrderError::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(OrderError::Unauthorized(_)) => StatusCode::UNAUTHORIZED,
            Some(OrderError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(OrderError::Conflict(_)) => StatusCode::CONFLICT,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self.0.downcast_ref::<OrderError>() {
            Some(OrderError::Validation(_)) => "validation",
            Some(OrderError::Unauthorized(_)) => "unauthorized",
            Some(OrderError::NotFound(_)) => "not_found",
            Some(OrderError::Conflict(_)) => "conflict",
            None => "internal",
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.0.downcast_ref::<OrderError>() {
            Some(err) => err.to_string(),
            None => {
                tracing::error!(error = %format!("{:#}", self.0), "request failed");
                "internal error".to_string()
            }
        };
        let body = ErrorBody {
            error: self.kind(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn domain_errors_survive_context() {
        let err: Result<(), _> = Err(OrderError::Conflict("taken".to_string()));
        let err = ApiError::from(err.context("fill order").unwrap_err());
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err = ApiError::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
