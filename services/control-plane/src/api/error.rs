//! RFC 7807 problem responses for the object API.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use keel_store::StoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub retryable: bool,
    pub retry_after_seconds: u32,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://keel.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            code,
            retryable: false,
            retry_after_seconds: 0,
        }
    }

    fn retryable(mut self, retry_after_seconds: u32) -> Self {
        self.retryable = true;
        self.retry_after_seconds = retry_after_seconds;
        self
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status,
            problem: Box::new(ProblemDetails::new(status, code, detail)),
        }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let detail = err.to_string();
        let (status, code, retry_after) = match &err {
            StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            StoreError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists", None),
            StoreError::Conflict { .. } => (StatusCode::CONFLICT, "conflict", Some(0)),
            StoreError::Expired { .. } => (StatusCode::GONE, "expired", None),
            StoreError::Invalid(_) => (StatusCode::BAD_REQUEST, "invalid", None),
            StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", Some(1)),
        };

        let mut problem = ProblemDetails::new(status, code, detail);
        if let Some(secs) = retry_after {
            problem = problem.retryable(secs);
        }
        Self {
            status,
            problem: Box::new(problem),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_api::{Kind, ObjectKey};

    #[test]
    fn store_errors_map_to_statuses() {
        let key = ObjectKey::new(Kind::Workload, "default", "w-1");

        let api: ApiError = StoreError::NotFound(key.clone()).into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);
        assert!(!api.problem.retryable);

        let api: ApiError = StoreError::Conflict {
            key,
            stored: 5,
            sent: 3,
        }
        .into();
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert!(api.problem.retryable);

        let api: ApiError = StoreError::Expired {
            requested: 1,
            oldest: 10,
        }
        .into();
        assert_eq!(api.status, StatusCode::GONE);

        let api: ApiError = StoreError::Invalid("bad".into()).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);

        let api: ApiError = StoreError::Unavailable("log".into()).into();
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(api.problem.retryable);
    }
}
