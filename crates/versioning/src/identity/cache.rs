//! Identity cache.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::partition::RequestPartitionId;
use crate::types::ResourceLookup;

/// A cached identity. Deletion state is never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedIdentity {
    /// Internal key.
    pub surrogate_id: i64,
    /// Resource type.
    pub resource_type: String,
    /// Explicit external id.
    pub external_id: Option<String>,
    /// Partition.
    pub partition_id: Option<i32>,
}

impl CachedIdentity {
    /// Converts back to a lookup with unknown deletion state.
    pub fn to_lookup(&self) -> ResourceLookup {
        ResourceLookup {
            surrogate_id: self.surrogate_id,
            resource_type: self.resource_type.clone(),
            external_id: self.external_id.clone(),
            partition_id: self.partition_id,
            deleted_at: None,
        }
    }
}

impl From<&ResourceLookup> for CachedIdentity {
    fn from(lookup: &ResourceLookup) -> Self {
        Self {
            surrogate_id: lookup.surrogate_id,
            resource_type: lookup.resource_type.clone(),
            external_id: lookup.external_id.clone(),
            partition_id: lookup.partition_id,
        }
    }
}

/// A cache entry waiting for its transaction to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedIdentity {
    /// An external id mapping, plus its reverse.
    Forward {
        /// Partition scope the id was resolved under.
        scope: RequestPartitionId,
        /// Resource type.
        resource_type: String,
        /// The id as it was looked up.
        id: String,
        /// The identity it maps to.
        identity: CachedIdentity,
    },
    /// Only the public id of a surrogate id.
    Reverse {
        /// Internal key.
        surrogate_id: i64,
        /// Public id.
        public_id: String,
    },
}

/// Bidirectional, bounded identity cache.
///
/// Committed identity records are immutable, so a stale read is harmless. Once the cache
/// holds `max_entries` keys in a direction, new keys in that direction are not
/// admitted.
#[derive(Debug)]
pub struct IdentityCache {
    forward: RwLock<HashMap<String, CachedIdentity>>,
    reverse: RwLock<HashMap<i64, String>>,
    max_entries: usize,
}

impl IdentityCache {
    /// Creates a cache bounded to `max_entries` per direction.
    pub fn new(max_entries: usize) -> Self {
        Self {
            forward: RwLock::new(HashMap::new()),
            reverse: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    fn forward_key(partition: &RequestPartitionId, resource_type: &str, id: &str) -> String {
        format!("{}/{}/{}", partition.stringify_for_key(), resource_type, id)
    }

    /// Looks up an identity by external id.
    pub fn get(
        &self,
        partition: &RequestPartitionId,
        resource_type: &str,
        id: &str,
    ) -> Option<CachedIdentity> {
        self.forward
            .read()
            .get(&Self::forward_key(partition, resource_type, id))
            .cloned()
    }

    /// Caches an identity under an external id, and its reverse mapping.
    pub fn put(
        &self,
        partition: &RequestPartitionId,
        resource_type: &str,
        id: &str,
        identity: CachedIdentity,
    ) {
        let public_id = identity
            .external_id
            .clone()
            .unwrap_or_else(|| identity.surrogate_id.to_string());
        self.put_public_id(identity.surrogate_id, public_id);

        let key = Self::forward_key(partition, resource_type, id);
        let mut forward = self.forward.write();
        if forward.len() < self.max_entries || forward.contains_key(&key) {
            forward.insert(key, identity);
        }
    }

    /// Looks up the public id of a surrogate id.
    pub fn get_public_id(&self, surrogate_id: i64) -> Option<String> {
        self.reverse.read().get(&surrogate_id).cloned()
    }

    /// Caches the public id of a surrogate id.
    pub fn put_public_id(&self, surrogate_id: i64, public_id: String) {
        let mut reverse = self.reverse.write();
        if reverse.len() < self.max_entries || reverse.contains_key(&surrogate_id) {
            reverse.insert(surrogate_id, public_id);
        }
    }

    /// Publishes entries staged by a committed transaction.
    pub fn publish(&self, staged: Vec<StagedIdentity>) {
        for entry in staged {
            match entry {
                StagedIdentity::Forward {
                    scope,
                    resource_type,
                    id,
                    identity,
                } => self.put(&scope, &resource_type, &id, identity),
                StagedIdentity::Reverse {
                    surrogate_id,
                    public_id,
                } => self.put_public_id(surrogate_id, public_id),
            }
        }
    }

    /// Number of forward entries.
    pub fn len(&self) -> usize {
        self.forward.read().len()
    }

    /// Returns `true` if there are no forward entries.
    pub fn is_empty(&self) -> bool {
        self.forward.read().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.forward.write().clear();
        self.reverse.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(surrogate_id: i64, external_id: Option<&str>) -> CachedIdentity {
        CachedIdentity {
            surrogate_id,
            resource_type: "Widget".to_string(),
            external_id: external_id.map(str::to_string),
            partition_id: None,
        }
    }

    #[test]
    fn test_put_and_get() {
        let cache = IdentityCache::new(10);
        let partition = RequestPartitionId::default_partition();
        cache.put(&partition, "Widget", "abc", identity(5, Some("abc")));

        assert_eq!(cache.get(&partition, "Widget", "abc").unwrap().surrogate_id, 5);
        assert_eq!(cache.get_public_id(5).as_deref(), Some("abc"));
        assert!(cache.get(&partition, "Gadget", "abc").is_none());
        assert!(
            cache
                .get(&RequestPartitionId::from_partition_id(1), "Widget", "abc")
                .is_none()
        );
    }

    #[test]
    fn test_reverse_defaults_to_decimal() {
        let cache = IdentityCache::new(10);
        cache.put(
            &RequestPartitionId::default_partition(),
            "Widget",
            "7",
            identity(7, None),
        );
        assert_eq!(cache.get_public_id(7).as_deref(), Some("7"));
    }

    #[test]
    fn test_publish_staged_entries() {
        let cache = IdentityCache::new(10);
        let partition = RequestPartitionId::from_partition_id(3);
        cache.publish(vec![
            StagedIdentity::Forward {
                scope: partition.clone(),
                resource_type: "Widget".to_string(),
                id: "abc".to_string(),
                identity: identity(4, Some("abc")),
            },
            StagedIdentity::Reverse {
                surrogate_id: 9,
                public_id: "nine".to_string(),
            },
        ]);

        assert_eq!(cache.get(&partition, "Widget", "abc").unwrap().surrogate_id, 4);
        assert_eq!(cache.get_public_id(4).as_deref(), Some("abc"));
        assert_eq!(cache.get_public_id(9).as_deref(), Some("nine"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_bounded() {
        let cache = IdentityCache::new(1);
        let partition = RequestPartitionId::default_partition();
        cache.put(&partition, "Widget", "a", identity(1, Some("a")));
        cache.put(&partition, "Widget", "b", identity(2, Some("b")));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&partition, "Widget", "b").is_none());

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get_public_id(1).is_none());
    }
}
