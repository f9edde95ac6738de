//! Write outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a completed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageOutcome {
    /// A new resource was created.
    Create,
    /// A conditional create matched an existing resource; nothing was written.
    CreateConditionalMatch,
    /// A new version was written.
    Update,
    /// The update carried no change; nothing was written.
    UpdateNoChange,
    /// The resource was deleted.
    Delete,
    /// The resource was already deleted; nothing was written.
    DeleteAlreadyDeleted,
    /// A patch produced a new version.
    Patch,
    /// A patch produced no change; nothing was written.
    PatchNoChange,
    /// A history version was rewritten in place.
    HistoryRewrite,
}

impl StorageOutcome {
    /// Message code reported to callers.
    pub fn message_code(&self) -> &'static str {
        match self {
            StorageOutcome::Create => "SUCCESSFUL_CREATE",
            StorageOutcome::CreateConditionalMatch => "SUCCESSFUL_CREATE_WITH_CONDITIONAL_MATCH",
            StorageOutcome::Update => "SUCCESSFUL_UPDATE",
            StorageOutcome::UpdateNoChange => "SUCCESSFUL_UPDATE_NO_CHANGE",
            StorageOutcome::Delete => "SUCCESSFUL_DELETE",
            StorageOutcome::DeleteAlreadyDeleted => "SUCCESSFUL_DELETE_ALREADY_DELETED",
            StorageOutcome::Patch => "SUCCESSFUL_PATCH",
            StorageOutcome::PatchNoChange => "SUCCESSFUL_PATCH_NO_CHANGE",
            StorageOutcome::HistoryRewrite => "SUCCESSFUL_HISTORY_REWRITE",
        }
    }

    /// Returns `true` if nothing was persisted.
    pub fn is_no_op(&self) -> bool {
        matches!(
            self,
            StorageOutcome::CreateConditionalMatch
                | StorageOutcome::UpdateNoChange
                | StorageOutcome::DeleteAlreadyDeleted
                | StorageOutcome::PatchNoChange
        )
    }
}

impl fmt::Display for StorageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message_code())
    }
}

/// The result of a write, as reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// Public id of the resource.
    pub id: String,
    /// Resource type.
    pub resource_type: String,
    /// Version after the write.
    pub version: i64,
    /// The write brought the resource into existence (including re-creation of
    /// a deleted resource).
    pub created: bool,
    /// Nothing was persisted.
    pub no_op: bool,
    /// Outcome classification.
    pub status: StorageOutcome,
    /// The resource as stored, with `id` and `meta` populated. `Null` for deletes.
    pub resource: Value,
    /// The previous version's content, when staged.
    pub previous: Option<Value>,
}

impl WriteOutcome {
    /// Returns the versioned reference `Type/id/_history/version`.
    pub fn versioned_reference(&self) -> String {
        format!(
            "{}/{}/_history/{}",
            self.resource_type, self.id, self.version
        )
    }
}
