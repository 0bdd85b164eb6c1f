//! Catalog hashing for session records.
//!
//! This module provides deterministic hashing of the catalog so that plans
//! and history entries can be tied back to the exact catalog that drove them.

use sha2::{Digest, Sha256};

use super::spec::{DeployConfig, PackageEntry};

/// Hasher for computing catalog hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the deployment catalog.
    ///
    /// Entry order is significant: reordering the catalog changes the hash
    /// because it changes execution order.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.app.name.as_bytes());
        if let Some(version) = &config.app.version {
            hasher.update(version.as_bytes());
        }

        for entry in &config.catalog {
            hasher.update(self.hash_entry(entry).as_bytes());
        }

        let session = &config.session;
        for name in &session.blocking_processes {
            hasher.update(name.to_lowercase().as_bytes());
        }
        let mut benign = session.benign_codes.clone();
        benign.sort_unstable();
        for code in benign {
            hasher.update(code.to_be_bytes());
        }
        if let Some(mb) = session.required_disk_space_mb {
            hasher.update(mb.to_be_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single catalog entry.
    #[must_use]
    pub fn hash_entry(&self, entry: &PackageEntry) -> String {
        let mut hasher = Sha256::new();

        hasher.update(entry.product_key.as_bytes());
        hasher.update(entry.action.to_string().as_bytes());
        hasher.update([u8::from(entry.enabled)]);

        if let Some(installer) = &entry.installer {
            hasher.update(installer.to_string_lossy().as_bytes());
        }
        if let Some(transform) = &entry.transform {
            hasher.update(transform.to_string_lossy().as_bytes());
        }
        for patch in &entry.patches {
            hasher.update(patch.to_string_lossy().as_bytes());
        }
        if let Some(code) = entry.failure_code {
            hasher.update(code.to_be_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Returns a short form of a hash (first 8 characters).
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..8).unwrap_or(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    const CATALOG: &str = r#"
app:
  name: acme-suite
catalog:
  - product_key: "{AAAA-0001}"
    action: uninstall
  - product_key: "{BBBB-0001}"
    action: install
"#;

    #[test]
    fn test_hash_is_deterministic() {
        let config = ConfigParser::new().parse_yaml(CATALOG, None).unwrap();
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.hash_config(&config), hasher.hash_config(&config));
        assert_eq!(hasher.hash_config(&config).len(), 64);
    }

    #[test]
    fn test_hash_changes_with_order() {
        let config = ConfigParser::new().parse_yaml(CATALOG, None).unwrap();
        let mut reordered = config.clone();
        reordered.catalog.reverse();

        let hasher = ConfigHasher::new();
        assert_ne!(hasher.hash_config(&config), hasher.hash_config(&reordered));
    }

    #[test]
    fn test_disabling_entry_changes_hash() {
        let config = ConfigParser::new().parse_yaml(CATALOG, None).unwrap();
        let mut disabled = config.clone();
        disabled.catalog[0].enabled = false;

        let hasher = ConfigHasher::new();
        assert_ne!(hasher.hash_config(&config), hasher.hash_config(&disabled));
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(ConfigHasher::short_hash("0123456789abcdef"), "01234567");
        assert_eq!(ConfigHasher::short_hash("abc"), "abc");
    }
}
