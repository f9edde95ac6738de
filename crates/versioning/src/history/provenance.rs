//! Provenance captured on history entries.

use serde_json::Value;

use crate::config::StorageSettings;
use crate::partition::RequestContext;

/// Maximum stored length of a source URI.
pub const MAX_SOURCE_URI_LENGTH: usize = 100;

/// Maximum stored length of a request id.
pub const MAX_REQUEST_ID_LENGTH: usize = 16;

/// Source URI and request id recorded with a version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    /// The part of `meta.source` before `#`.
    pub source_uri: Option<String>,
    /// The request that produced the version.
    pub request_id: Option<String>,
}

impl Provenance {
    /// Derives provenance from the resource's `meta.source` and the request.
    ///
    /// The request id comes from the request context unless the settings ask
    /// to preserve the one embedded after `#` in `meta.source`.
    pub fn from_request(resource: &Value, ctx: &RequestContext, settings: &StorageSettings) -> Self {
        let source = resource
            .get("meta")
            .and_then(|m| m.get("source"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let (uri, body_request_id) = match source.split_once('#') {
            Some((uri, request_id)) => (uri, Some(request_id)),
            None => (source, None),
        };

        let request_id = if settings.preserve_request_id_in_resource_body {
            body_request_id.filter(|r| !r.is_empty()).or(ctx.request_id())
        } else {
            ctx.request_id()
        };

        Self {
            source_uri: non_empty_truncated(uri, MAX_SOURCE_URI_LENGTH),
            request_id: request_id.and_then(|r| non_empty_truncated(r, MAX_REQUEST_ID_LENGTH)),
        }
    }
}

impl Provenance {
    /// Recombines the provenance into a `meta.source` value.
    pub fn meta_source(&self) -> Option<String> {
        join_meta_source(self.source_uri.as_deref(), self.request_id.as_deref())
    }
}

/// Joins a source URI and request id as `uri#request`.
pub(crate) fn join_meta_source(uri: Option<&str>, request_id: Option<&str>) -> Option<String> {
    match (uri, request_id) {
        (Some(uri), Some(request)) => Some(format!("{}#{}", uri, request)),
        (Some(uri), None) => Some(uri.to_string()),
        (None, Some(request)) => Some(format!("#{}", request)),
        (None, None) => None,
    }
}

fn non_empty_truncated(value: &str, max: usize) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.chars().take(max).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_and_context_request_id() {
        let resource = json!({"meta": {"source": "urn:app#body-request"}});
        let ctx = RequestContext::default().with_request_id("ctx-request");
        let provenance = Provenance::from_request(&resource, &ctx, &StorageSettings::default());
        assert_eq!(provenance.source_uri.as_deref(), Some("urn:app"));
        assert_eq!(provenance.request_id.as_deref(), Some("ctx-request"));
        assert_eq!(provenance.meta_source().as_deref(), Some("urn:app#ctx-request"));
    }

    #[test]
    fn test_preserve_body_request_id() {
        let resource = json!({"meta": {"source": "urn:app#body-request"}});
        let ctx = RequestContext::default().with_request_id("ctx-request");
        let settings = StorageSettings {
            preserve_request_id_in_resource_body: true,
            ..StorageSettings::default()
        };
        let provenance = Provenance::from_request(&resource, &ctx, &settings);
        assert_eq!(provenance.request_id.as_deref(), Some("body-request"));
    }

    #[test]
    fn test_truncation() {
        let long_uri = format!("urn:{}", "x".repeat(200));
        let resource = json!({"meta": {"source": long_uri}});
        let ctx = RequestContext::default().with_request_id("0123456789abcdefXYZ");
        let provenance = Provenance::from_request(&resource, &ctx, &StorageSettings::default());
        assert_eq!(provenance.source_uri.unwrap().len(), MAX_SOURCE_URI_LENGTH);
        assert_eq!(provenance.request_id.as_deref(), Some("0123456789abcdef"));
    }

    #[test]
    fn test_no_source() {
        let provenance = Provenance::from_request(
            &json!({"resourceType": "Widget"}),
            &RequestContext::default(),
            &StorageSettings::default(),
        );
        assert_eq!(provenance, Provenance::default());
    }
}
