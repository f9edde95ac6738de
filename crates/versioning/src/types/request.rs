//! Write request types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StorageError, StorageResult, ValidationError};

/// A logical write submitted to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Resource type the request targets.
    pub resource_type: String,
    /// Target id. May carry a `Type/` prefix and a `/_history/{v}` suffix.
    pub id: Option<String>,
    /// Expected current version (optimistic concurrency).
    pub version: Option<i64>,
    /// Resource body.
    pub content: Value,
    /// Run change detection and mark the record indexed.
    pub perform_indexing: bool,
    /// Write a new version even when nothing changed.
    pub force_update: bool,
    /// Conditional create or update criteria.
    pub match_criteria: Option<String>,
    /// Rewrite the history version named by the id.
    pub rewrite_history: bool,
}

impl WriteRequest {
    /// Creates a request for `resource_type` with the given body.
    pub fn new(resource_type: impl Into<String>, content: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: None,
            version: None,
            content,
            perform_indexing: true,
            force_update: false,
            match_criteria: None,
            rewrite_history: false,
        }
    }

    /// Sets the target id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the expected current version.
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets conditional create or update criteria.
    pub fn with_match_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.match_criteria = Some(criteria.into());
        self
    }

    /// Forces a new version.
    pub fn forced(mut self) -> Self {
        self.force_update = true;
        self
    }

    /// Defers indexing and change detection.
    pub fn without_indexing(mut self) -> Self {
        self.perform_indexing = false;
        self
    }

    /// Requests a history rewrite.
    pub fn rewriting_history(mut self) -> Self {
        self.rewrite_history = true;
        self
    }
}

/// A parsed resource id of the form `[Type/]id[/_history/version]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    /// Type prefix, when present.
    pub resource_type: Option<String>,
    /// The id part.
    pub id: String,
    /// The version part, when present.
    pub version: Option<i64>,
}

impl ResourceId {
    /// Parses an id string.
    pub fn parse(value: &str) -> StorageResult<Self> {
        let value = value.trim();
        let (path, version) = match value.split_once("/_history/") {
            Some((path, version)) => {
                let version = version.trim_end_matches('/').parse::<i64>().map_err(|_| {
                    StorageError::invalid_request(format!("Invalid version in id: {}", value))
                })?;
                (path, Some(version))
            }
            None => (value, None),
        };

        let (resource_type, id) = match path.rsplit_once('/') {
            Some((resource_type, id)) => (Some(resource_type.to_string()), id.to_string()),
            None => (None, path.to_string()),
        };

        Ok(Self {
            resource_type,
            id,
            version,
        })
    }

    /// Returns `true` if the id part is blank.
    pub fn is_blank(&self) -> bool {
        self.id.trim().is_empty()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(resource_type) = &self.resource_type {
            write!(f, "{}/", resource_type)?;
        }
        write!(f, "{}", self.id)?;
        if let Some(version) = self.version {
            write!(f, "/_history/{}", version)?;
        }
        Ok(())
    }
}

/// A patch applied to the current version of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchDocument {
    /// RFC 6902 JSON Patch.
    JsonPatch(Value),
    /// RFC 7386 JSON Merge Patch.
    MergePatch(Value),
}

impl PatchDocument {
    /// Applies the patch to `resource`, returning the patched copy.
    pub fn apply(&self, resource: &Value) -> StorageResult<Value> {
        let mut patched = resource.clone();
        match self {
            PatchDocument::JsonPatch(doc) => {
                let patch: json_patch::Patch =
                    serde_json::from_value(doc.clone()).map_err(|e| {
                        StorageError::Validation(ValidationError::Unprocessable {
                            message: format!("Invalid JSON Patch document: {}", e),
                            details: vec![],
                        })
                    })?;
                json_patch::patch(&mut patched, &patch).map_err(|e| {
                    StorageError::Validation(ValidationError::Unprocessable {
                        message: format!("Failed to apply JSON Patch: {}", e),
                        details: vec![],
                    })
                })?;
            }
            PatchDocument::MergePatch(doc) => json_patch::merge(&mut patched, doc),
        }
        Ok(patched)
    }
}
