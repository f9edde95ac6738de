//! Content validation collaborators.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ValidationDetail, ValidationSeverity};
use crate::types::ResourceKind;

/// Validates resource content before it is stored.
///
/// Issues with [`ValidationSeverity::Error`] reject the write as unprocessable.
#[async_trait]
pub trait ContentValidator: Send + Sync {
    /// Validates `resource` against its kind.
    async fn validate(&self, kind: &ResourceKind, resource: &Value) -> Vec<ValidationDetail>;
}

/// Checks references against the target types declared on the resource kind.
///
/// Local (`#id`) and `urn:` references are not checked.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceTargetValidator;

impl ReferenceTargetValidator {
    /// Creates the validator.
    pub fn new() -> Self {
        Self
    }

    fn reference_type(reference: &str) -> Option<&str> {
        if reference.starts_with('#') || reference.starts_with("urn:") {
            return None;
        }
        let path = reference.split("/_history/").next().unwrap_or(reference);
        let mut segments = path.rsplit('/');
        let _id = segments.next()?;
        segments.next().filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl ContentValidator for ReferenceTargetValidator {
    async fn validate(&self, kind: &ResourceKind, resource: &Value) -> Vec<ValidationDetail> {
        let mut issues = Vec::new();
        for rule in kind.reference_rules() {
            let Some(value) = resource.get(&rule.element) else {
                continue;
            };
            let references: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for reference in references
                .into_iter()
                .filter_map(|r| r.get("reference"))
                .filter_map(Value::as_str)
            {
                let Some(target) = Self::reference_type(reference) else {
                    continue;
                };
                if !rule.target_types.iter().any(|t| t == target) {
                    issues.push(ValidationDetail {
                        path: format!("{}.{}", kind.name(), rule.element),
                        message: format!(
                            "Invalid reference target type {} in {}, expected one of [{}]",
                            target,
                            reference,
                            rule.target_types.join(", ")
                        ),
                        severity: ValidationSeverity::Error,
                    });
                }
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kind() -> ResourceKind {
        ResourceKind::new("Widget").with_reference_rule("owner", ["Person", "Organization"])
    }

    #[tokio::test]
    async fn test_valid_references() {
        let resource = json!({
            "resourceType": "Widget",
            "owner": [
                {"reference": "Person/1"},
                {"reference": "http://example.org/base/Organization/o1/_history/2"},
                {"reference": "#contained"}
            ]
        });
        let issues = ReferenceTargetValidator::new().validate(&kind(), &resource).await;
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_reference_target() {
        let resource = json!({
            "resourceType": "Widget",
            "owner": {"reference": "Device/d1"}
        });
        let issues = ReferenceTargetValidator::new().validate(&kind(), &resource).await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "Widget.owner");
        assert_eq!(issues[0].severity, ValidationSeverity::Error);
        assert!(issues[0].message.contains("Device"));
    }

    #[test]
    fn test_reference_type_parsing() {
        assert_eq!(ReferenceTargetValidator::reference_type("Person/1"), Some("Person"));
        assert_eq!(ReferenceTargetValidator::reference_type("1"), None);
        assert_eq!(ReferenceTargetValidator::reference_type("urn:uuid:123"), None);
    }
}
