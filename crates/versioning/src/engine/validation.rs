//! Request checks applied before anything is persisted.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::config::ClientIdStrategy;
use crate::error::{
    StorageError, StorageResult, ValidationDetail, ValidationError, ValidationSeverity,
};
use crate::identity::is_numeric_id;

/// System of the security label marking a resource as a subset.
pub const SUBSETTED_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ObservationValue";

/// Code of the security label marking a resource as a subset.
pub const SUBSETTED_CODE: &str = "SUBSETTED";

static ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").ok());

/// Checks that `id` is a syntactically valid resource id.
pub fn validate_id_syntax(id: &str) -> StorageResult<()> {
    if ID_PATTERN.as_ref().is_some_and(|re| re.is_match(id)) {
        Ok(())
    } else {
        Err(StorageError::invalid_request(format!(
            "Can not process entity with ID[{}], this is not a valid FHIR ID",
            id
        )))
    }
}

/// Checks that the body's `resourceType` matches the request's type.
pub fn validate_resource_type(resource_type: &str, resource: &Value) -> StorageResult<()> {
    match resource.get("resourceType").and_then(Value::as_str) {
        Some(found) if found == resource_type => Ok(()),
        Some(found) => Err(StorageError::unprocessable(format!(
            "Incorrect resource type detected for endpoint, found {} but expected {}",
            found, resource_type
        ))),
        None => Err(StorageError::unprocessable(format!(
            "Resource body does not declare a resourceType, expected {}",
            resource_type
        ))),
    }
}

/// Rejects resources carrying the SUBSETTED security label.
pub fn reject_subsetted(resource: &Value) -> StorageResult<()> {
    let subsetted = resource
        .get("meta")
        .and_then(|m| m.get("security"))
        .and_then(Value::as_array)
        .is_some_and(|labels| {
            labels.iter().any(|label| {
                label.get("system").and_then(Value::as_str) == Some(SUBSETTED_SYSTEM)
                    && label.get("code").and_then(Value::as_str) == Some(SUBSETTED_CODE)
            })
        });
    if subsetted {
        return Err(StorageError::unprocessable(
            "Unable to store a resource with the SUBSETTED security label",
        ));
    }
    Ok(())
}

/// Checks whether a client may create a resource under `id`.
pub fn validate_client_id(
    strategy: ClientIdStrategy,
    resource_type: &str,
    id: &str,
    system_request: bool,
) -> StorageResult<()> {
    match strategy {
        ClientIdStrategy::NotAllowed if !system_request => Err(StorageError::not_found(
            resource_type,
            id,
        )),
        ClientIdStrategy::AlphanumericOnly if is_numeric_id(id) => {
            Err(StorageError::invalid_request(format!(
                "Can not create resource with ID[{}], no resource with this ID exists and clients may only assign IDs which contain at least one non-numeric character",
                id
            )))
        }
        _ => Ok(()),
    }
}

/// Turns validator findings into an error when any has error severity.
pub fn check_findings(
    resource_type: &str,
    findings: Vec<ValidationDetail>,
) -> StorageResult<()> {
    if findings
        .iter()
        .any(|d| d.severity == ValidationSeverity::Error)
    {
        return Err(ValidationError::Unprocessable {
            message: format!("{} failed validation", resource_type),
            details: findings,
        }
        .into());
    }
    Ok(())
}
