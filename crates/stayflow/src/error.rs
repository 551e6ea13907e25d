use crate::config::ConfigError;
use crate::lifecycle::access::AccessError;
use crate::lifecycle::ledger::LedgerError;
use crate::lifecycle::{ImportError, OrchestratorError, StoreError};
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Import(ImportError),
    Engine(OrchestratorError),
    Store(StoreError),
    Ledger(LedgerError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Import(err) => write!(f, "import error: {}", err),
            AppError::Engine(err) => write!(f, "engine error: {}", err),
            AppError::Store(err) => write!(f, "store error: {}", err),
            AppError::Ledger(err) => write!(f, "ledger error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Import(err) => Some(err),
            AppError::Engine(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Ledger(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Import(_) => StatusCode::BAD_REQUEST,
            AppError::Engine(OrchestratorError::NotFound(_))
            | AppError::Ledger(LedgerError::UnknownBooking(_)) => StatusCode::NOT_FOUND,
            AppError::Engine(OrchestratorError::ConcurrentModification { .. }) => {
                StatusCode::CONFLICT
            }
            AppError::Engine(OrchestratorError::InvalidCommand(_)) => StatusCode::BAD_REQUEST,
            AppError::Engine(
                OrchestratorError::InvalidTransition(_) | OrchestratorError::CapacityExceeded(_),
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Engine(OrchestratorError::Store(_))
            | AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Store(_)
            | AppError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<ImportError> for AppError {
    fn from(value: ImportError) -> Self {
        Self::Import(value)
    }
}

impl From<OrchestratorError> for AppError {
    fn from(value: OrchestratorError) -> Self {
        Self::Engine(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<LedgerError> for AppError {
    fn from(value: LedgerError) -> Self {
        Self::Ledger(value)
    }
}

impl From<AccessError> for AppError {
    fn from(value: AccessError) -> Self {
        match value {
            AccessError::Store(err) => Self::Store(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::domain::{EntityId, EntityKind, EntityRef};

    #[test]
    fn engine_errors_keep_their_http_meaning() {
        let missing = AppError::from(OrchestratorError::NotFound(EntityRef::new(
            EntityKind::Booking,
            &EntityId::new("booking-1"),
        )));
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let stale = AppError::from(OrchestratorError::ConcurrentModification {
            entity: EntityRef::new(EntityKind::Booking, &EntityId::new("booking-1")),
            expected: Some(1),
            actual: Some(2),
        });
        assert_eq!(stale.into_response().status(), StatusCode::CONFLICT);

        let io = AppError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(
            io.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
