//! Engine configuration.
//!
//! [`StorageSettings`] holds the deployment-wide policies that steer identity
//! assignment, tag reconciliation, content encoding and history retention.
//! [`PartitionSettings`] controls how partition scopes filter identity lookups.
//!
//! Both types deserialize with defaults for every field, so a partial JSON
//! document is enough:
//!
//! ```
//! use helios_versioning::config::{ClientIdStrategy, StorageSettings, TagStorageMode};
//!
//! let settings = StorageSettings::from_json_str(
//!     r#"{ "client_id_strategy": "any", "tag_storage_mode": "inline" }"#,
//! ).unwrap();
//!
//! assert_eq!(settings.client_id_strategy, ClientIdStrategy::Any);
//! assert_eq!(settings.tag_storage_mode, TagStorageMode::Inline);
//! assert!(settings.history_enabled);
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::codec::ResourceEncoding;
use crate::error::{StorageError, StorageResult};
use crate::tags::TagType;

/// System of the tag used to pin a subscription matching strategy.
///
/// Such tags describe processing state rather than content, so they are never
/// carried over from a previous version.
pub const SUBSCRIPTION_MATCHING_STRATEGY_SYSTEM: &str =
    "http://hapifhir.io/fhir/StructureDefinition/subscription-matching-strategy";

/// Policy gating whether a client may choose a resource's identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientIdStrategy {
    /// Clients may not assign identifiers (system requests excepted).
    NotAllowed,
    /// Clients may assign identifiers containing at least one non-digit.
    AlphanumericOnly,
    /// Clients may assign any identifier; every identifier is tracked explicitly.
    Any,
}

/// How identifiers are generated for resources created without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerIdStrategy {
    /// The surrogate id doubles as the public identifier.
    Sequential,
    /// A random UUID is assigned as an explicit external identifier.
    Uuid,
}

/// Deployment-wide handling of tag, security label and profile metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagStorageMode {
    /// Each history entry keeps its own tag snapshot.
    Versioned,
    /// A single shared tag set, merged on update.
    NonVersioned,
    /// Tags are fully replaced on update and stored with the content.
    Inline,
}

impl TagStorageMode {
    /// Returns `true` if tags are stored as link rows.
    pub fn uses_links(&self) -> bool {
        !matches!(self, TagStorageMode::Inline)
    }
}

/// Settings controlling the versioning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Client identifier policy.
    #[serde(default = "default_client_id_strategy")]
    pub client_id_strategy: ClientIdStrategy,

    /// Server identifier policy for resources created without an id.
    #[serde(default = "default_server_id_strategy")]
    pub server_id_strategy: ServerIdStrategy,

    /// Tag storage policy.
    #[serde(default = "default_tag_storage_mode")]
    pub tag_storage_mode: TagStorageMode,

    /// Tag types that are snapshot-replaced (rather than merged) when the
    /// request carries no explicit hint.
    #[serde(default = "default_tag_snapshot_modes")]
    pub default_tag_snapshot_modes: BTreeSet<TagType>,

    /// Tag systems that are never carried over from a previous version.
    #[serde(default = "default_always_drop_tag_systems")]
    pub always_drop_tag_systems: Vec<String>,

    /// Hard cap on tags + security labels + profiles per resource. `0` disables it.
    #[serde(default)]
    pub max_meta_count: usize,

    /// Encoding used for stored resource bodies.
    #[serde(default = "default_resource_encoding")]
    pub resource_encoding: ResourceEncoding,

    /// Bodies whose JSON text is shorter than this are stored as inline text.
    /// `0` disables inline text.
    #[serde(default)]
    pub inline_resource_text_below_size: usize,

    /// Keep one history entry per version. When disabled only the latest
    /// history entry is retained.
    #[serde(default = "default_true")]
    pub history_enabled: bool,

    /// Allow callers to rewrite a specific history version in place.
    #[serde(default)]
    pub allow_history_rewrite: bool,

    /// Skip writes to a past history version whose content is unchanged.
    #[serde(default = "default_true")]
    pub suppress_updates_with_no_change: bool,

    /// Prefer the request id embedded in `meta.source` over the request context's.
    #[serde(default)]
    pub preserve_request_id_in_resource_body: bool,

    /// Deletion is enabled. When disabled, identity lookups may be answered
    /// from the cache since no resource can ever become a tombstone.
    #[serde(default = "default_true")]
    pub delete_enabled: bool,

    /// Skip staging the previous resource snapshot on updates.
    #[serde(default)]
    pub mass_ingestion_mode: bool,

    /// Sort tags, security labels and profiles when rendering resources.
    #[serde(default)]
    pub sort_meta_on_read: bool,

    /// Maximum number of identifiers per batched lookup statement.
    #[serde(default = "default_max_in_list_size")]
    pub max_in_list_size: usize,

    /// Maximum number of entries kept in the identity cache.
    #[serde(default = "default_identity_cache_max_entries")]
    pub identity_cache_max_entries: usize,

    /// Partitioning behaviour.
    #[serde(default)]
    pub partitions: PartitionSettings,
}

fn default_client_id_strategy() -> ClientIdStrategy {
    ClientIdStrategy::AlphanumericOnly
}

fn default_server_id_strategy() -> ServerIdStrategy {
    ServerIdStrategy::Sequential
}

fn default_tag_storage_mode() -> TagStorageMode {
    TagStorageMode::Versioned
}

fn default_tag_snapshot_modes() -> BTreeSet<TagType> {
    BTreeSet::from([TagType::Profile])
}

fn default_always_drop_tag_systems() -> Vec<String> {
    vec![SUBSCRIPTION_MATCHING_STRATEGY_SYSTEM.to_string()]
}

fn default_resource_encoding() -> ResourceEncoding {
    ResourceEncoding::JsonCompressed
}

fn default_max_in_list_size() -> usize {
    800
}

fn default_identity_cache_max_entries() -> usize {
    100_000
}

fn default_true() -> bool {
    true
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            client_id_strategy: default_client_id_strategy(),
            server_id_strategy: default_server_id_strategy(),
            tag_storage_mode: default_tag_storage_mode(),
            default_tag_snapshot_modes: default_tag_snapshot_modes(),
            always_drop_tag_systems: default_always_drop_tag_systems(),
            max_meta_count: 0,
            resource_encoding: default_resource_encoding(),
            inline_resource_text_below_size: 0,
            history_enabled: true,
            allow_history_rewrite: false,
            suppress_updates_with_no_change: true,
            preserve_request_id_in_resource_body: false,
            delete_enabled: true,
            mass_ingestion_mode: false,
            sort_meta_on_read: false,
            max_in_list_size: default_max_in_list_size(),
            identity_cache_max_entries: default_identity_cache_max_entries(),
            partitions: PartitionSettings::default(),
        }
    }
}

impl StorageSettings {
    /// Parses settings from a JSON document, filling in defaults.
    pub fn from_json_str(json: &str) -> StorageResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the settings for values the engine cannot operate with.
    pub fn validate(&self) -> StorageResult<()> {
        if self.max_in_list_size == 0 {
            return Err(StorageError::invalid_request(
                "max_in_list_size must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Sets the client identifier policy.
    pub fn with_client_id_strategy(mut self, strategy: ClientIdStrategy) -> Self {
        self.client_id_strategy = strategy;
        self
    }

    /// Sets the server identifier policy.
    pub fn with_server_id_strategy(mut self, strategy: ServerIdStrategy) -> Self {
        self.server_id_strategy = strategy;
        self
    }

    /// Sets the tag storage policy.
    pub fn with_tag_storage_mode(mut self, mode: TagStorageMode) -> Self {
        self.tag_storage_mode = mode;
        self
    }

    /// Sets the meta entry hard cap.
    pub fn with_max_meta_count(mut self, max: usize) -> Self {
        self.max_meta_count = max;
        self
    }

    /// Sets the body encoding.
    pub fn with_resource_encoding(mut self, encoding: ResourceEncoding) -> Self {
        self.resource_encoding = encoding;
        self
    }

    /// Sets the inline text threshold.
    pub fn with_inline_resource_text_below_size(mut self, size: usize) -> Self {
        self.inline_resource_text_below_size = size;
        self
    }

    /// Enables or disables per-version history retention.
    pub fn with_history_enabled(mut self, enabled: bool) -> Self {
        self.history_enabled = enabled;
        self
    }

    /// Enables or disables history rewrites.
    pub fn with_allow_history_rewrite(mut self, allow: bool) -> Self {
        self.allow_history_rewrite = allow;
        self
    }

    /// Enables or disables mass ingestion mode.
    pub fn with_mass_ingestion_mode(mut self, enabled: bool) -> Self {
        self.mass_ingestion_mode = enabled;
        self
    }

    /// Enables or disables meta sorting on read.
    pub fn with_sort_meta_on_read(mut self, enabled: bool) -> Self {
        self.sort_meta_on_read = enabled;
        self
    }

    /// Sets the batched lookup chunk size.
    pub fn with_max_in_list_size(mut self, size: usize) -> Self {
        self.max_in_list_size = size;
        self
    }

    /// Sets the partition settings.
    pub fn with_partitions(mut self, partitions: PartitionSettings) -> Self {
        self.partitions = partitions;
        self
    }
}

/// Settings controlling partition visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSettings {
    /// Numeric id that stands in for the default partition. `None` stores
    /// default-partition resources with a null partition.
    #[serde(default)]
    pub default_partition_id: Option<i32>,

    /// Resolve identifiers across every partition regardless of the request scope.
    #[serde(default)]
    pub allow_unqualified_cross_partition_reference: bool,
}

impl PartitionSettings {
    /// Sets the default partition id.
    pub fn with_default_partition_id(mut self, id: i32) -> Self {
        self.default_partition_id = Some(id);
        self
    }

    /// Enables unqualified cross-partition resolution.
    pub fn with_cross_partition_references(mut self, allow: bool) -> Self {
        self.allow_unqualified_cross_partition_reference = allow;
        self
    }
}
