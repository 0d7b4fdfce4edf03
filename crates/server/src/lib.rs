//! Presentation coach server
//!
//! WebSocket and HTTP endpoints: the per-session streaming channel, the
//! session/audio REST surface, TTS bridging, and the avatar tunnel.

pub mod avatar_ws;
pub mod http;
pub mod metrics;
pub mod request_id;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::init_metrics;
pub use state::AppState;
pub use websocket::ConnectionManager;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use coach_core::CoachError;

/// Wrapper so the core error taxonomy can be returned from handlers.
pub struct ApiError(pub CoachError);

impl From<CoachError> for ApiError {
    fn from(err: CoachError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::ErrorKind;

    #[test]
    fn test_api_error_status_mapping() {
        let err = CoachError::new(ErrorKind::SessionNotFound, "nope");
        let response = ApiError(err).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
