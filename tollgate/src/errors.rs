use crate::db::errors::DbError;
use crate::types::TeamId;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// The owning team is suspended or unknown to the platform
    #[error("Team {team_id} is not active")]
    TeamInactive { team_id: TeamId },

    /// No model group exists under the requested name
    #[error("Unknown model group `{name}`")]
    UnknownModelGroup { name: String },

    /// The model group exists but every entry is inactive
    #[error("Model group `{name}` has no active models")]
    NoActiveModels { name: String },

    /// Every candidate model in the group failed
    #[error("All {attempts} candidate models in group `{group}` failed")]
    AllModelsExhausted { group: String, attempts: usize },

    /// The upstream collaborator rejected the call outright
    #[error("Upstream call to `{model}` failed: {message}")]
    UpstreamCallFailed { model: String, message: String },

    /// The upstream collaborator did not answer in time
    #[error("Upstream call to `{model}` timed out")]
    UpstreamTimeout { model: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::TeamInactive { .. } => StatusCode::FORBIDDEN,
            Error::UnknownModelGroup { .. } => StatusCode::NOT_FOUND,
            Error::NoActiveModels { .. } => StatusCode::CONFLICT,
            Error::AllModelsExhausted { .. } => StatusCode::BAD_GATEWAY,
            Error::UpstreamCallFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::InvalidModelField { .. } => StatusCode::BAD_REQUEST,
                DbError::JobAlreadyTerminal { .. } => StatusCode::CONFLICT,
                DbError::InsufficientCredit { .. } => StatusCode::PAYMENT_REQUIRED,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::TeamInactive { team_id } => format!("Team {team_id} is not active"),
            Error::UnknownModelGroup { name } => format!("Unknown model group `{name}`"),
            Error::NoActiveModels { name } => format!("Model group `{name}` has no active models"),
            Error::AllModelsExhausted { group, attempts } => {
                format!("All {attempts} candidate models in group `{group}` failed")
            }
            Error::UpstreamCallFailed { model, message } => {
                format!("Upstream call to `{model}` failed: {message}")
            }
            Error::UpstreamTimeout { model } => format!("Upstream call to `{model}` timed out"),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { table, .. } => match table.as_deref() {
                    Some("model_groups") => "A model group with this name already exists".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::InvalidModelField { field } => format!("Invalid value for field `{field}`"),
                DbError::JobAlreadyTerminal { job_id, status } => {
                    format!("Job {job_id} is already {status} and cannot be modified")
                }
                DbError::InsufficientCredit { remaining, requested, .. } => {
                    format!("Insufficient credit: {remaining} remaining, {requested} requested")
                }
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::AllModelsExhausted { .. } | Error::UpstreamCallFailed { .. } | Error::UpstreamTimeout { .. } => {
                tracing::warn!("Upstream failure: {}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::TeamInactive { .. } => {
                tracing::info!("Rejected request for inactive team: {}", self);
            }
            Error::BadRequest { .. }
            | Error::NotFound { .. }
            | Error::UnknownModelGroup { .. }
            | Error::NoActiveModels { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        (status, self.user_message()).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn domain_errors_map_to_expected_status_codes() {
        let cases = [
            (
                Error::UnknownModelGroup {
                    name: "x".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                Error::NoActiveModels {
                    name: "x".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                Error::AllModelsExhausted {
                    group: "x".into(),
                    attempts: 2,
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                Error::UpstreamTimeout {
                    model: "m".into(),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                Error::Database(DbError::InsufficientCredit {
                    team_id: Uuid::nil(),
                    remaining: 0,
                    requested: 1,
                }),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                Error::Database(DbError::JobAlreadyTerminal {
                    job_id: Uuid::nil(),
                    status: crate::db::models::jobs::JobStatus::Completed,
                }),
                StatusCode::CONFLICT,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_code(), expected, "{error}");
        }
    }
}
