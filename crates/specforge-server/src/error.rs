use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use specforge_core::SpecError;

// ---------------------------------------------------------------------------
// Sentinels for failures that have no SpecError counterpart
// ---------------------------------------------------------------------------

/// Carries a 401 through the `anyhow::Error` chain.
#[derive(Debug)]
struct AuthFailed(String);

impl std::fmt::Display for AuthFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AuthFailed {}

/// Carries a 403 through the `anyhow::Error` chain.
#[derive(Debug)]
struct Forbidden(String);

impl std::fmt::Display for Forbidden {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Forbidden {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses. Renders
/// `{success: false, error: {code, message}}`.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(SpecError::InvalidRequest(msg.into()).into())
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self(AuthFailed(msg.into()).into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self(Forbidden(msg.into()).into())
    }

    /// Status and stable code for this error.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        if self.0.downcast_ref::<AuthFailed>().is_some() {
            return (StatusCode::UNAUTHORIZED, "AUTH_FAILED");
        }
        if self.0.downcast_ref::<Forbidden>().is_some() {
            return (StatusCode::FORBIDDEN, "FORBIDDEN");
        }
        match self.0.downcast_ref::<SpecError>() {
            Some(SpecError::NotFound { .. }) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Some(SpecError::InvalidId(_)) => (StatusCode::BAD_REQUEST, "INVALID_ID"),
            Some(SpecError::MissingField(_)) => (StatusCode::BAD_REQUEST, "MISSING_FIELD"),
            Some(
                SpecError::InvalidRequest(_)
                | SpecError::InvalidTransition { .. }
                | SpecError::SessionLocked(_)
                | SpecError::EmptySubmission,
            ) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            Some(SpecError::Unauthorized(_)) => (StatusCode::UNAUTHORIZED, "AUTH_FAILED"),
            // Governance rejections share the internal code; clients match
            // on the message prefix.
            Some(
                SpecError::GovernanceRejected(_)
                | SpecError::Db(_)
                | SpecError::Io(_)
                | SpecError::Yaml(_)
                | SpecError::Json(_),
            )
            | None => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        if status.is_server_error() {
            tracing::error!(code, "request failed: {:#}", self.0);
        }
        let body = serde_json::json!({
            "success": false,
            "error": { "code": code, "message": self.0.to_string() },
        });
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

// ---------------------------------------------------------------------------
// ApiJson: JSON body extractor that rejects through AppError
// ---------------------------------------------------------------------------

pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(invalid_body(rejection)),
        }
    }
}

fn invalid_body(rejection: JsonRejection) -> AppError {
    AppError::bad_request(format!("invalid body: {}", rejection.body_text()))
}
