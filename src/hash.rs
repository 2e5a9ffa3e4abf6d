//! Order-independent content fingerprints for rows.
//!
//! A row is canonicalized by sorting its keys and serializing it as compact
//! JSON, then digested. Two rows holding the same key → value pairs hash
//! identically regardless of column order. Value types are significant:
//! `{"a":"1"}` and `{"a":1}` produce different fingerprints.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Result, VaultError};
use crate::models::Row;

/// Digest applied to the canonical row text.
///
/// Fixed per database: switching algorithms on a populated store makes
/// every previously seen row look new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

/// Computes row fingerprints with a configured digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowHasher {
    algorithm: HashAlgorithm,
}

impl RowHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Fingerprint a row as a lowercase hex string.
    pub fn hash(&self, row: &Row) -> Result<String> {
        let canonical = canonical_json(row)?;
        Ok(match self.algorithm {
            HashAlgorithm::Md5 => format!("{:x}", md5::compute(canonical.as_bytes())),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(canonical.as_bytes())),
        })
    }
}

/// Fingerprint a row with the default (MD5) digest.
pub fn hash_row(row: &Row) -> Result<String> {
    RowHasher::default().hash(row)
}

/// Compact JSON of the row with top-level keys in lexicographic order.
fn canonical_json(row: &Row) -> Result<String> {
    let sorted: BTreeMap<&str, &Value> = row.iter().map(|(k, v)| (k.as_str(), v)).collect();
    serde_json::to_string(&sorted).map_err(|e| VaultError::Hash(e.to_string()))
}
