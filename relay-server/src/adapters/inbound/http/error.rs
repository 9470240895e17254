use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::{MonitorError, RegistryError};

const ERROR_TYPE_BASE: &str = "https://copier-status-relay.local/errors";

/// RFC 9457 problem details body
/// https://www.rfc-editor.org/rfc/rfc9457.html
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_uri: String,

    pub title: String,

    pub status: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    pub fn new(kind: &str, status: StatusCode) -> Self {
        Self {
            type_uri: format!("{}/{}", ERROR_TYPE_BASE, kind),
            title: status.canonical_reason().unwrap_or("Error").to_string(),
            status: status.as_u16(),
            detail: None,
            instance: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new("not-found", StatusCode::NOT_FOUND).with_detail(detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new("conflict", StatusCode::CONFLICT).with_detail(detail)
    }

    pub fn validation_error(detail: impl Into<String>) -> Self {
        Self::new("validation", StatusCode::BAD_REQUEST).with_detail(detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new("unauthorized", StatusCode::UNAUTHORIZED).with_detail(detail)
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new("internal", StatusCode::INTERNAL_SERVER_ERROR).with_detail(detail)
    }
}

impl From<MonitorError> for ProblemDetails {
    fn from(error: MonitorError) -> Self {
        match &error {
            MonitorError::UnknownApiKey => Self::unauthorized(error.to_string()),
            MonitorError::AccountNotFound(_) => Self::not_found(error.to_string()),
            MonitorError::InvalidRole(_) | MonitorError::SelfMerge(_) => {
                Self::validation_error(error.to_string())
            }
            MonitorError::Registry(RegistryError::Corrupt { .. }) => {
                tracing::error!(error = %error, "Request rejected, registry document is corrupt");
                Self::conflict(error.to_string())
            }
            MonitorError::Registry(_) => {
                tracing::error!(
                    error = %error,
                    error_type = std::any::type_name_of_val(&error),
                    "Registry operation failed"
                );
                Self::internal_error(error.to_string())
            }
        }
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = (status, Json(self)).into_response();
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

pub type ApiResult<T> = Result<T, ProblemDetails>;
