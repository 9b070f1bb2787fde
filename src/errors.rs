//! Unified error types for the settlement core.
//!
//! Validation and authorization errors surface to the caller unchanged.
//! Gateway errors display a generic retry message; the diagnostic detail is
//! kept in the wrapped [`GatewayError`] and in the logs.

use crate::integrations::gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Invalid amount: {amount} (must be greater than zero)")]
    InvalidAmount { amount: i64 },

    #[error(
        "Insufficient balance: wallet holds {balance} but {required} is required ({shortfall} short)"
    )]
    InsufficientBalance {
        balance: i64,
        required: i64,
        shortfall: i64,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error(
        "Pending balance {available} is below the payout minimum of {minimum} ({shortfall} more needed)"
    )]
    BelowMinimum {
        available: i64,
        minimum: i64,
        shortfall: i64,
    },

    #[error("No bank details on file for instructor {teacher_id}")]
    MissingBankDetails { teacher_id: String },

    #[error("Free {category} already used by student {student_id}")]
    QuotaExceeded {
        student_id: String,
        category: &'static str,
    },

    #[error("Payment could not be processed, please retry")]
    Gateway(#[source] GatewayError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

impl Error {
    /// Stable machine-readable code for callers that map errors to responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::InvalidAmount { .. } => "validation_error",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::Conflict { .. } => "conflict",
            Self::BelowMinimum { .. } => "below_minimum",
            Self::MissingBankDetails { .. } => "missing_bank_details",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Gateway(_) => "gateway_error",
            Self::Config { .. } | Self::Database(_) | Self::Io(_) | Self::EnvVar(_) => {
                "internal_error"
            }
        }
    }

    /// True for errors caused by the request itself (4xx class).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::Gateway(_) | Self::Config { .. } | Self::Database(_) | Self::Io(_) | Self::EnvVar(_)
        )
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub(crate) fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Maps a unique-index violation to `Conflict`, anything else to `Database`.
    pub(crate) fn from_insert(err: sea_orm::DbErr, message: impl FnOnce() -> String) -> Self {
        if matches!(
            err.sql_err(),
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
        ) {
            Self::conflict(message())
        } else {
            Self::Database(err)
        }
    }
}

impl From<GatewayError> for Error {
    fn from(value: GatewayError) -> Self {
        Self::Gateway(value)
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
