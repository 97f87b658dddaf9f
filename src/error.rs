use crate::auth::AuthError;
use crate::email::MailError;
use crate::movies::MovieError;
use crate::store::StoreError;
use crate::style::StyleError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use nfl_api::client::ApiError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0} is not configured")]
    Misconfigured(&'static str),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Store(StoreError::InvalidId(_)) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) | AppError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) | AppError::Store(StoreError::Offline(_) | StoreError::Remote { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Misconfigured(_) | AppError::Store(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// The response body every handler returns.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type AppResult<T> = Result<Json<Envelope<T>>, AppError>;

pub fn success<T: Serialize>(data: T) -> AppResult<T> {
    Ok(Json(Envelope { success: true, data: Some(data), error: None }))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{status}: {self}");
        }
        let body = Envelope::<()> { success: false, data: None, error: Some(self.to_string()) };
        (status, Json(body)).into_response()
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::NotFound(msg) => AppError::NotFound(msg),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<StyleError> for AppError {
    fn from(e: StyleError) -> Self {
        match e {
            StyleError::Store(inner) => match &*inner {
                StoreError::Offline(msg) => AppError::Store(StoreError::Offline(msg.clone())),
                other => AppError::Internal(other.to_string()),
            },
            StyleError::Disposed => AppError::Internal(e.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotConfigured(key) => AppError::Misconfigured(key),
            AuthError::Unauthorized | AuthError::InvalidToken | AuthError::Expired => AppError::Unauthorized,
            AuthError::Hmac(msg) => AppError::Internal(msg),
        }
    }
}

impl From<MailError> for AppError {
    fn from(e: MailError) -> Self {
        match e {
            MailError::NotConfigured(key) => AppError::Misconfigured(key),
            MailError::Store(e) => AppError::Store(e),
            MailError::Url(msg) => AppError::Internal(msg),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<MovieError> for AppError {
    fn from(e: MovieError) -> Self {
        match e {
            MovieError::NotConfigured => AppError::Misconfigured("TMDB_API_KEY"),
            MovieError::EmptyQuery => AppError::BadRequest(e.to_string()),
            MovieError::NotFound(_) => AppError::NotFound(e.to_string()),
            MovieError::Url(msg) => AppError::Internal(msg),
            other => AppError::Upstream(other.to_string()),
        }
    }
}
