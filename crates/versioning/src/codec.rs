//! Content codec.
//!
//! Turns a resource's logical content into the bytes or text that are stored
//! on a history entry, and computes the content hash used for change detection.
//!
//! Structural and volatile fields are stripped before encoding: the `id` is
//! always removed, and `meta` is removed either entirely or (when it carries
//! extensions that must survive) field by field. Tag metadata is therefore
//! never part of the hash.
//!
//! ```
//! use helios_versioning::codec::{self, ResourceEncoding};
//! use serde_json::json;
//!
//! let resource = json!({
//!     "resourceType": "Widget",
//!     "id": "w1",
//!     "meta": {"versionId": "3"},
//!     "color": "blue"
//! });
//! let excluded = codec::excluded_paths(&resource);
//! let encoded = codec::encode(&resource, ResourceEncoding::Json, &excluded, 0).unwrap();
//!
//! let text = encoded.text.as_deref().unwrap();
//! assert!(text.contains("blue"));
//! assert!(!text.contains("w1"));
//! assert!(encoded.hash.is_some());
//! ```

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{BackendError, StorageError, StorageResult};

/// Meta fields stripped when `meta` must otherwise be preserved.
const VOLATILE_META_FIELDS: &[&str] = &[
    "versionId",
    "lastUpdated",
    "source",
    "tag",
    "security",
    "profile",
];

/// How a history entry's content is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceEncoding {
    /// Plain UTF-8 JSON text.
    Json,
    /// Gzip-compressed JSON text.
    JsonCompressed,
    /// Zero-length deletion marker.
    Deleted,
    /// Content stored outside the engine; zero-length locally.
    Esr,
}

impl ResourceEncoding {
    /// The code persisted in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceEncoding::Json => "JSON",
            ResourceEncoding::JsonCompressed => "JSONC",
            ResourceEncoding::Deleted => "DEL",
            ResourceEncoding::Esr => "ESR",
        }
    }

    /// Returns `true` if this encoding carries no local content.
    pub fn is_empty(&self) -> bool {
        matches!(self, ResourceEncoding::Deleted | ResourceEncoding::Esr)
    }
}

impl fmt::Display for ResourceEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceEncoding {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "JSON" => Ok(ResourceEncoding::Json),
            "JSONC" => Ok(ResourceEncoding::JsonCompressed),
            "DEL" => Ok(ResourceEncoding::Deleted),
            "ESR" => Ok(ResourceEncoding::Esr),
            other => Err(codec_error(format!("Unknown resource encoding: {}", other))),
        }
    }
}

/// What to strip from a resource before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedPaths {
    /// Remove the top-level `id`.
    pub id: bool,
    /// Treatment of `meta`.
    pub meta: MetaExclusion,
}

/// Treatment of the `meta` element during encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaExclusion {
    /// Remove `meta` entirely.
    Whole,
    /// Remove only the volatile meta fields, keeping extensions and the rest.
    VolatileFields,
}

impl ExcludedPaths {
    /// Strips the excluded paths from `resource` in place.
    pub fn apply(&self, resource: &mut Value) {
        let Some(obj) = resource.as_object_mut() else {
            return;
        };
        if self.id {
            obj.remove("id");
        }
        match self.meta {
            MetaExclusion::Whole => {
                obj.remove("meta");
            }
            MetaExclusion::VolatileFields => {
                if let Some(meta) = obj.get_mut("meta").and_then(Value::as_object_mut) {
                    for field in VOLATILE_META_FIELDS {
                        meta.remove(*field);
                    }
                }
            }
        }
    }
}

/// The result of encoding a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedResource {
    /// The encoding actually used.
    pub encoding: ResourceEncoding,
    /// Text content, for `Json`.
    pub text: Option<String>,
    /// Binary content, for `JsonCompressed`.
    pub bytes: Option<Vec<u8>>,
    /// SHA-256 hex over the stored bytes. `None` for empty encodings.
    pub hash: Option<String>,
}

impl EncodedResource {
    /// A deletion marker.
    pub fn deleted() -> Self {
        Self {
            encoding: ResourceEncoding::Deleted,
            text: None,
            bytes: None,
            hash: None,
        }
    }

    /// Returns `true` if the given stored text and bytes are exactly this content.
    pub fn same_content(&self, text: Option<&str>, bytes: Option<&[u8]>) -> bool {
        self.text.as_deref() == text && self.bytes.as_deref() == bytes
    }
}

/// Computes the excluded paths for a resource.
pub fn excluded_paths(resource: &Value) -> ExcludedPaths {
    let meta_has_extensions = resource
        .get("meta")
        .and_then(|m| m.get("extension"))
        .and_then(Value::as_array)
        .is_some_and(|ext| !ext.is_empty());

    ExcludedPaths {
        id: true,
        meta: if meta_has_extensions {
            MetaExclusion::VolatileFields
        } else {
            MetaExclusion::Whole
        },
    }
}

/// Encodes a resource.
///
/// When `inline_below` is non-zero and the JSON text is shorter than it, the
/// content is stored as plain text regardless of the requested encoding.
pub fn encode(
    resource: &Value,
    encoding: ResourceEncoding,
    excluded: &ExcludedPaths,
    inline_below: usize,
) -> StorageResult<EncodedResource> {
    match encoding {
        ResourceEncoding::Deleted => return Ok(EncodedResource::deleted()),
        ResourceEncoding::Esr => {
            return Err(codec_error(
                "Externally stored content cannot be encoded locally".to_string(),
            ));
        }
        ResourceEncoding::Json | ResourceEncoding::JsonCompressed => {}
    }

    let mut stripped = resource.clone();
    excluded.apply(&mut stripped);
    let text = serde_json::to_string(&stripped)
        .map_err(|e| codec_error(format!("Failed to serialize resource: {}", e)))?;

    let inline = inline_below > 0 && text.len() < inline_below;
    if encoding == ResourceEncoding::Json || inline {
        let hash = content_hash(text.as_bytes());
        return Ok(EncodedResource {
            encoding: ResourceEncoding::Json,
            text: Some(text),
            bytes: None,
            hash: Some(hash),
        });
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| codec_error(format!("Failed to compress resource: {}", e)))?;
    let bytes = encoder
        .finish()
        .map_err(|e| codec_error(format!("Failed to compress resource: {}", e)))?;
    let hash = content_hash(&bytes);

    Ok(EncodedResource {
        encoding: ResourceEncoding::JsonCompressed,
        text: None,
        bytes: Some(bytes),
        hash: Some(hash),
    })
}

/// Decodes stored content back into JSON.
pub fn decode(
    encoding: ResourceEncoding,
    text: Option<&str>,
    bytes: Option<&[u8]>,
) -> StorageResult<Value> {
    match encoding {
        ResourceEncoding::Json => {
            let parsed = match (text, bytes) {
                (Some(text), _) => serde_json::from_str(text),
                (None, Some(bytes)) => serde_json::from_slice(bytes),
                (None, None) => {
                    return Err(codec_error("Stored JSON content is missing".to_string()));
                }
            };
            parsed.map_err(|e| codec_error(format!("Failed to deserialize resource: {}", e)))
        }
        ResourceEncoding::JsonCompressed => {
            let bytes = bytes
                .ok_or_else(|| codec_error("Stored compressed content is missing".to_string()))?;
            let mut decoder = GzDecoder::new(bytes);
            let mut text = String::new();
            decoder
                .read_to_string(&mut text)
                .map_err(|e| codec_error(format!("Failed to decompress resource: {}", e)))?;
            serde_json::from_str(&text)
                .map_err(|e| codec_error(format!("Failed to deserialize resource: {}", e)))
        }
        ResourceEncoding::Deleted => Err(codec_error(
            "A deletion marker has no content to decode".to_string(),
        )),
        ResourceEncoding::Esr => Err(codec_error(
            "Externally stored content is not available locally".to_string(),
        )),
    }
}

/// SHA-256 of `bytes`, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn codec_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::SerializationError { message })
}
