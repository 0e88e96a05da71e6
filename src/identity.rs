//
// identity.rs
// Dicom-Anonymizer-rs
//
// Mints stable, non-reversible anonymized ids per resolved identity and keeps the id to name registry.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AnonymizeError, Result};
use crate::models::IdMappingRow;
use crate::names::{normalize, sorted_key};

/// How anonymized ids are derived from identity keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKeyPolicy {
    /// Salted hash of the key: the same name always yields the same id.
    #[default]
    NormalizedName,
    /// Sequential number in order of first registration.
    DiscoveryOrder,
}

/// Identity key of a name: its normalized words, sorted, so swapped first
/// and last names collapse onto one key.
pub fn identity_key(raw_name: &str) -> String {
    sorted_key(&normalize(raw_name))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnonymizedIdentity {
    pub anon_id: String,
    pub key: String,
    pub original_name: String,
    /// Demographics row the identity was resolved to, if any.
    pub record: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct IdMinter {
    pub policy: IdentityKeyPolicy,
    pub prefix: String,
    pub salt: Option<String>,
    pub length: usize,
}

impl Default for IdMinter {
    fn default() -> Self {
        Self {
            policy: IdentityKeyPolicy::NormalizedName,
            prefix: "subj_".into(),
            salt: None,
            length: 8,
        }
    }
}

fn generate_hash(key: &str, salt: Option<&str>, length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    if let Some(salt) = salt {
        hasher.update(salt.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..length.min(digest.len())].to_string()
}

impl IdMinter {
    fn mint(&self, key: &str, index: usize) -> String {
        match self.policy {
            IdentityKeyPolicy::NormalizedName => format!(
                "{}{}",
                self.prefix,
                generate_hash(key, self.salt.as_deref(), self.length)
            ),
            IdentityKeyPolicy::DiscoveryOrder => {
                format!("{}{:0width$}", self.prefix, index, width = self.length)
            }
        }
    }

    /// Registration index encoded in an order-based id, if it is one of ours.
    fn index_of(&self, anon_id: &str) -> Option<usize> {
        anon_id.strip_prefix(&self.prefix)?.parse().ok()
    }
}

/// Process-wide store of identities, fed by a single writer.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    minter: IdMinter,
    by_key: BTreeMap<String, AnonymizedIdentity>,
    by_id: BTreeMap<String, String>,
    next_index: usize,
}

impl IdentityRegistry {
    pub fn new(minter: IdMinter) -> Self {
        Self {
            minter,
            by_key: BTreeMap::new(),
            by_id: BTreeMap::new(),
            next_index: 1,
        }
    }

    /// Resume from a previously written id mapping; its ids are kept verbatim.
    pub fn with_mapping(minter: IdMinter, rows: &[IdMappingRow]) -> Result<Self> {
        let mut registry = Self::new(minter);
        for row in rows {
            let key = identity_key(&row.name);
            if let Some(existing) = registry.by_id.get(&row.id) {
                if existing != &key {
                    return Err(AnonymizeError::IdCollision {
                        anon_id: row.id.clone(),
                        first: existing.clone(),
                        second: key,
                    });
                }
            }
            if let Some(index) = registry.minter.index_of(&row.id) {
                registry.next_index = registry.next_index.max(index + 1);
            }
            registry.by_id.insert(row.id.clone(), key.clone());
            registry.by_key.insert(
                key.clone(),
                AnonymizedIdentity {
                    anon_id: row.id.clone(),
                    key,
                    original_name: row.name.clone(),
                    record: None,
                },
            );
        }
        Ok(registry)
    }

    /// Return the identity for `key`, minting it on first sight.
    pub fn register(
        &mut self,
        key: &str,
        original_name: &str,
        record: Option<usize>,
    ) -> Result<AnonymizedIdentity> {
        if let Some(identity) = self.by_key.get_mut(key) {
            if identity.record.is_none() {
                identity.record = record;
            }
            return Ok(identity.clone());
        }

        let anon_id = self.minter.mint(key, self.next_index);
        if let Some(other) = self.by_id.get(&anon_id) {
            return Err(AnonymizeError::IdCollision {
                anon_id,
                first: other.clone(),
                second: key.to_string(),
            });
        }
        if self.minter.policy == IdentityKeyPolicy::DiscoveryOrder {
            self.next_index += 1;
        }

        let identity = AnonymizedIdentity {
            anon_id: anon_id.clone(),
            key: key.to_string(),
            original_name: original_name.to_string(),
            record,
        };
        self.by_id.insert(anon_id, key.to_string());
        self.by_key.insert(key.to_string(), identity.clone());
        Ok(identity)
    }

    /// Every identity known so far, in key order.
    pub fn identities(&self) -> impl Iterator<Item = &AnonymizedIdentity> {
        self.by_key.values()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Id to original-name rows, ordered by id.
    pub fn mapping(&self) -> Vec<IdMappingRow> {
        self.by_id
            .iter()
            .filter_map(|(id, key)| {
                self.by_key.get(key).map(|identity| IdMappingRow {
                    id: id.clone(),
                    name: identity.original_name.clone(),
                })
            })
            .collect()
    }
}
