//! Tag definitions and their extraction from resource metadata.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ResourceKind;

/// Category of a tag definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    /// A generic tag (`meta.tag`).
    Label,
    /// A security label (`meta.security`).
    SecurityLabel,
    /// A declared profile (`meta.profile`).
    Profile,
}

impl TagType {
    /// Integer code persisted in the database.
    pub fn code(&self) -> i64 {
        match self {
            TagType::Label => 0,
            TagType::SecurityLabel => 1,
            TagType::Profile => 2,
        }
    }

    /// Parses a persisted integer code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TagType::Label),
            1 => Some(TagType::SecurityLabel),
            2 => Some(TagType::Profile),
            _ => None,
        }
    }

    /// Parses a token of the meta snapshot mode request header.
    pub fn from_snapshot_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "TAG" => Some(TagType::Label),
            "SECURITY_LABEL" => Some(TagType::SecurityLabel),
            "PROFILE" => Some(TagType::Profile),
            _ => None,
        }
    }

    fn meta_field(&self) -> &'static str {
        match self {
            TagType::Label => "tag",
            TagType::SecurityLabel => "security",
            TagType::Profile => "profile",
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagType::Label => write!(f, "tag"),
            TagType::SecurityLabel => write!(f, "security-label"),
            TagType::Profile => write!(f, "profile"),
        }
    }
}

/// The identity of a tag definition.
///
/// Two definitions with the same key are the same definition, whatever their
/// display text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagKey {
    /// Category.
    pub tag_type: TagType,
    /// Coding system.
    pub system: Option<String>,
    /// Code within the system.
    pub code: Option<String>,
    /// Coding system version.
    pub version: Option<String>,
    /// User selection flag.
    pub user_selected: Option<bool>,
}

/// A globally deduplicated tag, security label or profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagDefinition {
    /// Database id, once persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Category.
    pub tag_type: TagType,
    /// Coding system. Profiles carry no system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Code, or the canonical URL of a profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    /// Coding system version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// User selection flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_selected: Option<bool>,
}

impl TagDefinition {
    /// Creates a generic tag.
    pub fn tag(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self::coding(TagType::Label, Some(system.into()), Some(code.into()))
    }

    /// Creates a security label.
    pub fn security(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self::coding(TagType::SecurityLabel, Some(system.into()), Some(code.into()))
    }

    /// Creates a profile declaration.
    pub fn profile(url: impl Into<String>) -> Self {
        Self::coding(TagType::Profile, None, Some(url.into()))
    }

    fn coding(tag_type: TagType, system: Option<String>, code: Option<String>) -> Self {
        Self {
            id: None,
            tag_type,
            system,
            code,
            display: None,
            version: None,
            user_selected: None,
        }
    }

    /// Sets the display text.
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Returns the identity key.
    pub fn key(&self) -> TagKey {
        TagKey {
            tag_type: self.tag_type,
            system: self.system.clone(),
            code: self.code.clone(),
            version: self.version.clone(),
            user_selected: self.user_selected,
        }
    }

    /// Parses a coding from `meta.tag` or `meta.security`.
    ///
    /// Returns `None` when system, code and display are all blank.
    pub fn from_coding(tag_type: TagType, coding: &Value) -> Option<Self> {
        let text = |field: &str| {
            coding
                .get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let system = text("system");
        let code = text("code");
        let display = text("display");
        if system.is_none() && code.is_none() && display.is_none() {
            return None;
        }
        Some(Self {
            id: None,
            tag_type,
            system,
            code,
            display,
            version: text("version"),
            user_selected: coding.get("userSelected").and_then(Value::as_bool),
        })
    }

    /// Renders this definition the way it appears in resource metadata.
    pub fn to_meta_value(&self) -> Value {
        if self.tag_type == TagType::Profile {
            return Value::String(self.code.clone().unwrap_or_default());
        }
        let mut coding = Map::new();
        if let Some(system) = &self.system {
            coding.insert("system".to_string(), Value::String(system.clone()));
        }
        if let Some(version) = &self.version {
            coding.insert("version".to_string(), Value::String(version.clone()));
        }
        if let Some(code) = &self.code {
            coding.insert("code".to_string(), Value::String(code.clone()));
        }
        if let Some(display) = &self.display {
            coding.insert("display".to_string(), Value::String(display.clone()));
        }
        if let Some(user_selected) = self.user_selected {
            coding.insert("userSelected".to_string(), Value::Bool(user_selected));
        }
        Value::Object(coding)
    }

    fn sort_key(&self) -> (&str, &str) {
        (
            self.system.as_deref().unwrap_or(""),
            self.code.as_deref().unwrap_or(""),
        )
    }
}

impl PartialEq for TagDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.tag_type == other.tag_type
            && self.system == other.system
            && self.code == other.code
            && self.version == other.version
            && self.user_selected == other.user_selected
    }
}

impl Eq for TagDefinition {}

impl Hash for TagDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Collects the tags, security labels and profiles of a resource.
///
/// Duplicates are removed, keeping the first occurrence. A non-standard resource
/// kind with a default profile contributes that profile implicitly.
pub fn extract_tags(resource: &Value, kind: &ResourceKind) -> Vec<TagDefinition> {
    let mut tags = Vec::new();
    let meta = resource.get("meta");

    for tag_type in [TagType::Label, TagType::SecurityLabel] {
        if let Some(codings) = meta
            .and_then(|m| m.get(tag_type.meta_field()))
            .and_then(Value::as_array)
        {
            tags.extend(
                codings
                    .iter()
                    .filter_map(|c| TagDefinition::from_coding(tag_type, c)),
            );
        }
    }

    if let Some(profiles) = meta
        .and_then(|m| m.get("profile"))
        .and_then(Value::as_array)
    {
        tags.extend(
            profiles
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(TagDefinition::profile),
        );
    }

    if !kind.is_standard() {
        if let Some(profile) = kind.default_profile() {
            tags.push(TagDefinition::profile(profile));
        }
    }

    dedupe(tags)
}

/// Removes duplicate definitions, keeping the first occurrence.
pub fn dedupe(tags: Vec<TagDefinition>) -> Vec<TagDefinition> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|t| seen.insert(t.key()))
        .collect()
}

/// Replaces `meta.tag`, `meta.security` and `meta.profile` with `tags`.
pub fn apply_to_meta(resource: &mut Value, tags: &[TagDefinition]) {
    let Some(obj) = resource.as_object_mut() else {
        return;
    };
    let meta = obj
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(meta) = meta.as_object_mut() else {
        return;
    };

    for tag_type in [TagType::Label, TagType::SecurityLabel, TagType::Profile] {
        let values: Vec<Value> = tags
            .iter()
            .filter(|t| t.tag_type == tag_type)
            .map(TagDefinition::to_meta_value)
            .collect();
        if values.is_empty() {
            meta.remove(tag_type.meta_field());
        } else {
            meta.insert(tag_type.meta_field().to_string(), Value::Array(values));
        }
    }
}

/// Sorts tags and security labels by (system, code), and profiles alphabetically.
pub fn sort_meta(resource: &mut Value) {
    let Some(meta) = resource.get_mut("meta").and_then(Value::as_object_mut) else {
        return;
    };
    for field in ["tag", "security"] {
        if let Some(codings) = meta.get_mut(field).and_then(Value::as_array_mut) {
            codings.sort_by(|a, b| compare_codings(a, b));
        }
    }
    if let Some(profiles) = meta.get_mut("profile").and_then(Value::as_array_mut) {
        profiles.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    }
}

fn compare_codings(a: &Value, b: &Value) -> Ordering {
    let field = |v: &Value, name: &str| v.get(name).and_then(Value::as_str).unwrap_or("").to_string();
    (field(a, "system"), field(a, "code")).cmp(&(field(b, "system"), field(b, "code")))
}

/// Sorts definitions into their rendering order.
pub fn sort_definitions(tags: &mut [TagDefinition]) {
    tags.sort_by(|a, b| {
        a.tag_type
            .cmp(&b.tag_type)
            .then_with(|| a.sort_key().cmp(&b.sort_key()))
    });
}
