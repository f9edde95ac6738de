//! Rendering of stored versions back into resources.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::tags::{TagDefinition, apply_to_meta, sort_meta};

/// Populates `id` and `meta` of a resource body.
///
/// `meta.versionId`, `meta.lastUpdated` and `meta.source` are overwritten, and
/// the tag, security and profile lists are replaced by `tags`.
pub fn render_resource(
    mut content: Value,
    public_id: &str,
    version: i64,
    updated_at: DateTime<Utc>,
    source: Option<String>,
    tags: &[TagDefinition],
    sort: bool,
) -> Value {
    let Some(obj) = content.as_object_mut() else {
        return content;
    };
    obj.insert("id".to_string(), Value::String(public_id.to_string()));

    let meta = obj
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("versionId".to_string(), Value::String(version.to_string()));
        meta.insert(
            "lastUpdated".to_string(),
            Value::String(updated_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        match source {
            Some(source) => {
                meta.insert("source".to_string(), Value::String(source));
            }
            None => {
                meta.remove("source");
            }
        }
    }

    apply_to_meta(&mut content, tags);
    if sort {
        sort_meta(&mut content);
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_populates_meta() {
        let rendered = render_resource(
            json!({"resourceType": "Widget", "color": "blue"}),
            "w1",
            3,
            Utc::now(),
            Some("urn:app#r1".to_string()),
            &[TagDefinition::tag("http://t", "a")],
            false,
        );
        assert_eq!(rendered["id"], "w1");
        assert_eq!(rendered["meta"]["versionId"], "3");
        assert_eq!(rendered["meta"]["source"], "urn:app#r1");
        assert_eq!(rendered["meta"]["tag"][0]["code"], "a");
        assert!(rendered["meta"]["lastUpdated"].is_string());
    }

    #[test]
    fn test_render_keeps_meta_extensions() {
        let rendered = render_resource(
            json!({
                "resourceType": "Widget",
                "meta": {"extension": [{"url": "http://e", "valueBoolean": true}]}
            }),
            "w1",
            1,
            Utc::now(),
            None,
            &[],
            true,
        );
        assert_eq!(rendered["meta"]["extension"][0]["url"], "http://e");
        assert!(rendered["meta"].get("source").is_none());
        assert!(rendered["meta"].get("tag").is_none());
    }
}
