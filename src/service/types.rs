// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the ranked item service.

use thiserror::Error;
use crate::request::{ErrorResponse, ValidationError};
use crate::storage::traits::StoreError;

/// Outcome of a failed service call.
///
/// `Validation`, `NotFound` and `AlreadyExists` are expected outcomes the
/// caller branches on. `Store` covers every other durable-store failure and
/// must be rendered without its detail.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("Item {id} not found for owner {owner_id}")]
    NotFound { id: i64, owner_id: i64 },
    #[error("Item {id} already exists")]
    AlreadyExists { id: i64 },
    #[error(transparent)]
    Store(StoreError),
    /// A backend could not be reached while wiring the service up.
    #[error("Failed to connect: {0}")]
    Connect(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id, owner_id } => Self::NotFound { id, owner_id },
            StoreError::AlreadyExists { id } => Self::AlreadyExists { id },
            StoreError::PriorityOverflow { base, offset } => Self::Validation(ValidationError::new(
                "priority",
                format!("priority {base} leaves no room for {offset} more rows"),
            )),
            other => Self::Store(other),
        }
    }
}

impl ServiceError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Store(StoreError::Timeout { .. }) => "timeout",
            Self::Store(StoreError::RollbackFailed { .. }) => "rollback_failed",
            Self::Store(_) => "store",
            Self::Connect(_) => "connect",
        }
    }

    /// The payload a caller may see.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        match self {
            Self::Validation(err) => ErrorResponse::validation(err),
            Self::NotFound { .. } => ErrorResponse::not_found(),
            Self::AlreadyExists { id } => ErrorResponse::conflict(*id),
            Self::Store(_) | Self::Connect(_) => ErrorResponse::internal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKey;

    #[test]
    fn test_store_not_found_stays_distinguishable() {
        let err = ServiceError::from(StoreError::not_found(ItemKey::new(1, 7)));
        assert!(err.is_not_found());
        assert_eq!(err.to_response(), ErrorResponse::not_found());
    }

    #[test]
    fn test_store_failure_hides_detail() {
        let err = ServiceError::from(StoreError::RollbackFailed {
            cause: "deadlock detected".into(),
            rollback: "connection reset".into(),
        });
        assert_eq!(err.kind(), "rollback_failed");

        let response = err.to_response();
        assert_eq!(response, ErrorResponse::internal());
        assert!(!serde_json::to_string(&response).unwrap().contains("deadlock"));
    }

    #[test]
    fn test_duplicate_maps_to_conflict() {
        let err = ServiceError::from(StoreError::AlreadyExists { id: 5 });
        assert_eq!(err.kind(), "already_exists");
        assert_eq!(err.to_response().details["id"], "5");
    }

    #[test]
    fn test_priority_overflow_is_a_priority_error() {
        let err = ServiceError::from(StoreError::PriorityOverflow { base: i64::MAX, offset: 3 });
        assert_eq!(err.kind(), "validation");
        match &err {
            ServiceError::Validation(v) => assert_eq!(v.field, "priority"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
