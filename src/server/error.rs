use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::error::{Error, ErrorKind};
use crate::protocol::WireError;

pub(super) type AppResult<T> = Result<T, AppError>;

/// Store/channel error on its way out of a handler.
///
/// The kind and message are forwarded unchanged; only the HTTP status is
/// derived from the kind.
#[derive(Debug)]
pub(super) struct AppError(Error);

const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidKey => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Serialization => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if matches!(self.0.kind(), ErrorKind::Unavailable | ErrorKind::Conflict) {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(WireError::from(&self.0))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(value: Error) -> Self {
        Self(value)
    }
}

/// Bodies that never arrived in full are not payload errors: an exceeded
/// `max_body` is `TooLarge`, any other buffering failure is `Unavailable`.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let status = rejection.status();
        let message = rejection.body_text();
        Self(match rejection {
            JsonRejection::BytesRejection(_) if status == StatusCode::PAYLOAD_TOO_LARGE => {
                Error::TooLarge(message)
            }
            JsonRejection::BytesRejection(_) => Error::from_parts(ErrorKind::Unavailable, message),
            _ => Error::Serialization(message),
        })
    }
}
