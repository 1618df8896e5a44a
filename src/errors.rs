use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standardized error payload returned to HTTP callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Unprocessable Entity").
    pub error: String,
    /// Human-readable error description.
    pub message: String,
    /// Additional detail, when safe to expose.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred.
    pub timestamp: String,
}

/// Typed failures of the ledger subsystem.
///
/// Every variant is fully recovered at the movement-service boundary: an
/// error means the transaction rolled back and no partial state is
/// observable.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// An `OUT` movement or a receipt reversal would drive stock below
    /// zero. Carries the shortfall so callers can report how much is
    /// missing.
    #[error("Insufficient stock for material {material_id}: short by {shortfall}")]
    InsufficientStock {
        material_id: Uuid,
        shortfall: Decimal,
    },

    /// An automated movement already exists for this purchase. The normal
    /// receipt path reports already-applied instead; this fires only if a
    /// second purchase-sourced append is attempted outright.
    #[error("Purchase {0} already has an active ledger movement")]
    DuplicateReceipt(Uuid),

    /// Attempt to edit or delete a movement whose source forbids it.
    #[error("Immutable movement: {0}")]
    ImmutableMovement(String),

    /// The cached stock figure disagrees with the replayed ledger. Never
    /// auto-corrected; surfaced for operator investigation.
    #[error("Stock drift for material {material_id}: cached {cached}, replayed {computed}")]
    ConsistencyDrift {
        material_id: Uuid,
        cached: Decimal,
        computed: Decimal,
    },

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Returns the HTTP status code for this error.
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) | Self::InvalidStatus(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DuplicateReceipt(_) | Self::ImmutableMovement(_) => StatusCode::CONFLICT,
            Self::DatabaseError(_)
            | Self::ConsistencyDrift { .. }
            | Self::EventError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            Self::ConsistencyDrift { material_id, .. } => {
                format!("Stock consistency check failed for material {}", material_id)
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InsufficientStock {
                material_id: Uuid::nil(),
                shortfall: dec!(3),
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::DuplicateReceipt(Uuid::nil()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ImmutableMovement("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ConsistencyDrift {
                material_id: Uuid::nil(),
                cached: dec!(5),
                computed: dec!(7),
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("pool exhausted".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::db_error("constraint violated").response_message(),
            "Internal server error"
        );

        // User-facing errors keep the actual message.
        let err = ServiceError::InsufficientStock {
            material_id: Uuid::nil(),
            shortfall: dec!(30),
        };
        assert!(err.response_message().contains("short by 30"));
    }

    #[test]
    fn insufficient_stock_reports_shortfall() {
        let err = ServiceError::InsufficientStock {
            material_id: Uuid::nil(),
            shortfall: dec!(12.5),
        };
        assert!(err.to_string().contains("12.5"));
    }
}
