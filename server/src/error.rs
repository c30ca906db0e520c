use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Failures surfaced at the HTTP boundary. Callers only ever see the fixed
/// status and message; details stay in the logs.
#[derive(Debug, Error)]
pub enum RaffleError {
    #[error("method not allowed")]
    InvalidMethod,
    #[error("origin denied")]
    OriginDenied,
    #[error("rate limited")]
    RateLimited,
    #[error("malformed body: {0}")]
    MalformedBody(String),
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub(crate) struct ErrorBody {
    ok: bool,
    error: &'static str,
}

impl ErrorBody {
    pub(crate) fn new(error: &'static str) -> Self {
        Self { ok: false, error }
    }
}

impl RaffleError {
    pub fn status(&self) -> StatusCode {
        match self {
            RaffleError::InvalidMethod => StatusCode::METHOD_NOT_ALLOWED,
            RaffleError::OriginDenied => StatusCode::FORBIDDEN,
            RaffleError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RaffleError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            RaffleError::Store(_) | RaffleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            RaffleError::InvalidMethod => "Método no permitido",
            RaffleError::OriginDenied => "Acceso denegado",
            RaffleError::RateLimited => "Demasiadas solicitudes, probá en un minuto",
            RaffleError::MalformedBody(_) => "Solicitud inválida",
            RaffleError::Store(_) | RaffleError::Internal(_) => INTERNAL_ERROR_MESSAGE,
        }
    }
}

pub(crate) const INTERNAL_ERROR_MESSAGE: &str = "Error interno";

impl IntoResponse for RaffleError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, "raffle.internal_error");
        }
        (self.status(), Json(ErrorBody::new(self.public_message()))).into_response()
    }
}
