use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use portier_shared::protocol::ErrorPayload;

use crate::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Upstream(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Configuration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server configuration error".to_string(),
            ),
            ServerError::Upstream(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status, Json(ErrorPayload::new(message))).into_response()
    }
}

impl From<GatewayError> for ServerError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::MissingApiKey => ServerError::Configuration(e.to_string()),
            GatewayError::UnknownModel(_) | GatewayError::EmptyConversation => {
                ServerError::BadRequest(e.to_string())
            }
            GatewayError::Upstream { message, .. } => ServerError::Upstream(message),
            GatewayError::Transport(_) | GatewayError::InvalidResponse => {
                ServerError::Upstream(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response) -> ErrorPayload {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn configuration_details_are_not_leaked() {
        let response = ServerError::Configuration("OPENAI_API_KEY is not configured".into())
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(response).await.error.message, "Server configuration error");
    }

    #[tokio::test]
    async fn gateway_errors_map_to_status() {
        let response = ServerError::from(GatewayError::UnknownModel("gpt-2".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(response).await.error.message, "Unknown model: gpt-2");

        let response = ServerError::from(GatewayError::Upstream {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "slow down".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_of(response).await.error.message, "slow down");
    }
}
