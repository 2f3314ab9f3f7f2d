use axum::async_trait;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::authz::ResolveError;
use crate::keys::KeyFormatError;
use crate::storage::DatabaseError;

// ============================================================================
// Error body
// ============================================================================

/// Wire form of every error: `{"status": 404, "reason": "Account not found"}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub reason: String,
    pub status: u16,
}

/// Handler error carrying the status code and a human readable reason
#[derive(Debug)]
pub struct ApiError {
    pub reason: String,
    pub status: StatusCode,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            reason: self.reason,
            status: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl ApiError {
    pub fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            status,
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason)
    }

    /// The fixed gate rejection. Never says why.
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, reason)
    }

    pub fn not_acceptable(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_ACCEPTABLE, reason)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, reason)
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, reason)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(_) => ApiError::not_found(e.to_string()),
            DatabaseError::Conflict(reason) => ApiError::new(StatusCode::CONFLICT, reason),
            DatabaseError::Invalid(reason) => ApiError::bad_request(reason),
            DatabaseError::Decode(_) | DatabaseError::Encode(_) | DatabaseError::Table(_) => {
                error!(error = %e, "Stored data is unreadable");
                ApiError::internal(e.to_string())
            }
            _ => {
                error!(error = %e, "Storage unavailable");
                ApiError::unavailable(e.to_string())
            }
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::SignedKeysRequired => ApiError::not_acceptable(e.to_string()),
            ResolveError::Storage(e) => e.into(),
        }
    }
}

impl From<KeyFormatError> for ApiError {
    fn from(e: KeyFormatError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

// ============================================================================
// Extractors that reject with the error body instead of plain text
// ============================================================================

pub struct AppJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::new(rejection.status(), rejection.body_text())
}

pub struct AppQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(AppQuery(value)),
            Err(rejection) => Err(query_rejection(rejection)),
        }
    }
}

fn query_rejection(rejection: QueryRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}

pub struct AppPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(AppPath(value)),
            Err(rejection) => Err(path_rejection(rejection)),
        }
    }
}

fn path_rejection(rejection: PathRejection) -> ApiError {
    ApiError::new(rejection.status(), rejection.body_text())
}

// ============================================================================
// Headers
// ============================================================================

/// `X-From-Cache: true|false`
pub fn from_cache_header(hit: bool) -> [(HeaderName, HeaderValue); 1] {
    let value = if hit { "true" } else { "false" };
    [(HeaderName::from_static("x-from-cache"), HeaderValue::from_static(value))]
}
