// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire-shaped requests and responses.
//!
//! Request types mirror the JSON bodies and query strings of the HTTP
//! surface: every field is optional on the wire so that a missing value is
//! reported as a [`ValidationError`] instead of a decode failure. `validate`
//! turns them into domain types before any store or cache call.
//!
//! The owning collection is called `projectId` on the wire (`ownerId` is
//! accepted as an alias).

use std::collections::BTreeMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::item::{ItemDraft, ItemKey, ItemPatch, ListParams, PriorityEntry, Reprioritized};

pub const NOT_FOUND_CODE: i64 = 3;
pub const NOT_FOUND_MESSAGE: &str = "errors.good.notFound";
pub const VALIDATION_CODE: i64 = 1;
pub const VALIDATION_MESSAGE: &str = "errors.request.invalid";
pub const CONFLICT_CODE: i64 = 4;
pub const CONFLICT_MESSAGE: &str = "errors.good.alreadyExists";
pub const INTERNAL_CODE: i64 = 2;
pub const INTERNAL_MESSAGE: &str = "errors.internal";

/// Rejected input, reported before anything is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Decode a JSON body; malformed input becomes a `body` validation error.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ValidationError> {
    serde_json::from_slice(body).map_err(|e| ValidationError::new("body", format!("malformed body: {}", e)))
}

/// `?limit=&offset=`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl ListQuery {
    /// Absent or non-positive values fall back to the listing defaults.
    #[must_use]
    pub fn params(&self) -> ListParams {
        ListParams::new(self.limit.unwrap_or(0), self.offset.unwrap_or(0))
    }
}

/// `?id=&projectId=` addressing one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemKeyQuery {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, alias = "ownerId")]
    pub project_id: Option<i64>,
}

impl ItemKeyQuery {
    pub fn validate(&self) -> Result<ItemKey, ValidationError> {
        match (self.id, self.project_id) {
            (Some(id), Some(owner_id)) => Ok(ItemKey::new(id, owner_id)),
            _ => Err(ValidationError::new("id", "id and projectId query params are required")),
        }
    }
}

/// Create body; the owner comes from the `projectId` query parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateRequest {
    pub fn validate(self, project_id: Option<i64>) -> Result<ItemDraft, ValidationError> {
        let owner_id = project_id
            .filter(|owner| *owner > 0)
            .ok_or_else(|| ValidationError::new("projectId", "projectId is required"))?;
        let name = self
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ValidationError::new("name", "name is required"))?;
        let id = self
            .id
            .filter(|id| *id != 0)
            .ok_or_else(|| ValidationError::new("id", "id is required"))?;

        Ok(ItemDraft::new(id, owner_id, name).with_description(self.description.unwrap_or_default()))
    }
}

/// Update body. `removed` must be explicit; an empty `description` keeps
/// the stored one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    #[serde(default, alias = "ownerId")]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl UpdateRequest {
    pub fn validate(self) -> Result<ItemPatch, ValidationError> {
        let name = self
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ValidationError::new("name", "name is required"))?;
        let priority = self
            .priority
            .filter(|priority| *priority != 0)
            .ok_or_else(|| ValidationError::new("priority", "priority field is required"))?;
        let removed = self
            .removed
            .ok_or_else(|| ValidationError::new("removed", "removed field is required"))?;
        let owner_id = self
            .project_id
            .filter(|owner| *owner != 0)
            .ok_or_else(|| {
                ValidationError::new("projectId", "projectId field is required or cannot be equal to 0")
            })?;

        Ok(ItemPatch {
            owner_id,
            name,
            description: self.description.filter(|d| !d.is_empty()),
            priority,
            removed,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReprioritizeRequest {
    #[serde(default)]
    pub new_priority: Option<i64>,
}

impl ReprioritizeRequest {
    pub fn validate(&self) -> Result<i64, ValidationError> {
        self.new_priority
            .filter(|priority| *priority != 0)
            .ok_or_else(|| ValidationError::new("newPriority", "newPriority field is required"))
    }
}

/// `{ "priorities": [{ "id", "priority" }, ...] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReprioritizeResponse {
    pub priorities: Vec<PriorityEntry>,
}

impl From<Reprioritized> for ReprioritizeResponse {
    fn from(result: Reprioritized) -> Self {
        Self {
            priorities: result.priorities,
        }
    }
}

/// Error payload shown to callers. Never carries backend detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: i64,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl ErrorResponse {
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            code: NOT_FOUND_CODE,
            message: NOT_FOUND_MESSAGE.to_string(),
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn validation(error: &ValidationError) -> Self {
        Self {
            code: VALIDATION_CODE,
            message: VALIDATION_MESSAGE.to_string(),
            details: BTreeMap::from([(error.field.to_string(), error.message.clone())]),
        }
    }

    #[must_use]
    pub fn conflict(id: i64) -> Self {
        Self {
            code: CONFLICT_CODE,
            message: CONFLICT_MESSAGE.to_string(),
            details: BTreeMap::from([("id".to_string(), id.to_string())]),
        }
    }

    #[must_use]
    pub fn internal() -> Self {
        Self {
            code: INTERNAL_CODE,
            message: INTERNAL_MESSAGE.to_string(),
            details: BTreeMap::new(),
        }
    }
}
