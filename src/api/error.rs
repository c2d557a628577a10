use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::error::{DatabaseError, Error, LlmError, MailError, TicketError};

/// Handler error rendered as `{"error": msg}` with a matching status code.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Desk(Error),
}

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self::Desk(e.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        let err = match self {
            Self::BadRequest(_) => return StatusCode::BAD_REQUEST,
            Self::Desk(e) => e,
        };
        match err {
            Error::Ticket(
                TicketError::NotFound { .. }
                | TicketError::MemberNotFound { .. }
                | TicketError::SurveyNotFound,
            ) => StatusCode::NOT_FOUND,
            Error::Ticket(_) => StatusCode::BAD_REQUEST,
            Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Mail(MailError::NotConfigured { .. })
            | Error::Llm(LlmError::NotConfigured { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Mail(_) | Error::Llm(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::BadRequest(msg) => msg.clone(),
            Self::Desk(e) => e.to_string(),
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
