//! Uniform JSON envelope for every REST response.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::Serialize,
};

pub const SUCCESS: &str = "SUCCESS";

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize = serde_json::Value> {
    pub status: u16,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<T>,
}

impl ApiResponse<serde_json::Value> {
    /// 200 with no payload.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK.as_u16(),
            code: SUCCESS.into(),
            message: message.into(),
            results: None,
        }
    }

    pub fn failure(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            code: code.into(),
            message: message.into(),
            results: None,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    /// 200 carrying `results`.
    pub fn ok(message: impl Into<String>, results: T) -> Self {
        Self {
            status: StatusCode::OK.as_u16(),
            code: SUCCESS.into(),
            message: message.into(),
            results: Some(results),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}
