//! Store configuration via TOML
//!
//! A [`BtreeConfiguration`] fixes a store's identity (partition and replica),
//! its storage ceilings and its key ordering. It can be built in code or
//! loaded from a TOML file; either way [`BtreeConfiguration::validate`] runs
//! when the store is opened.

use crate::ordering::KeyComparisonDescription;
use relistore_core::{Error, PartitionId, ReplicaId, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the checkpoint image inside a persisted store's directory.
pub const CHECKPOINT_FILE_NAME: &str = "btree.ckpt";

fn default_page_size_kb() -> u32 {
    8
}

fn default_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

/// Storage ceilings and persistence settings.
///
/// A ceiling of `0` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtreeStorageConfiguration {
    /// Directory holding the checkpoint image; required unless volatile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Keep all state in memory only
    #[serde(default = "default_true")]
    pub is_volatile: bool,
    /// Upper bound on checkpoint image size (MB)
    #[serde(default)]
    pub maximum_storage_mb: u64,
    /// Upper bound on live entry memory (MB)
    #[serde(default)]
    pub maximum_memory_mb: u64,
    /// Page size used for page accounting (KB)
    #[serde(default = "default_page_size_kb")]
    pub maximum_page_size_kb: u32,
    /// Charge values inline with their key instead of as a separate allocation
    #[serde(default = "default_true")]
    pub store_data_inline: bool,
    /// Non-blocking attempts on the store's internal lock before blocking
    #[serde(default = "default_retries")]
    pub retries_before_timeout: u32,
}

impl Default for BtreeStorageConfiguration {
    fn default() -> Self {
        Self {
            path: None,
            is_volatile: true,
            maximum_storage_mb: 0,
            maximum_memory_mb: 0,
            maximum_page_size_kb: default_page_size_kb(),
            store_data_inline: true,
            retries_before_timeout: default_retries(),
        }
    }
}

impl BtreeStorageConfiguration {
    /// Persisted storage rooted at `path`
    pub fn persisted(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            is_volatile: false,
            ..Self::default()
        }
    }

    /// Page size in bytes
    pub fn page_size_bytes(&self) -> u64 {
        self.maximum_page_size_kb as u64 * 1024
    }

    /// Memory ceiling in bytes, `None` when unlimited
    pub fn memory_limit_bytes(&self) -> Option<u64> {
        (self.maximum_memory_mb > 0).then(|| self.maximum_memory_mb * 1024 * 1024)
    }

    /// Storage ceiling in bytes, `None` when unlimited
    pub fn storage_limit_bytes(&self) -> Option<u64> {
        (self.maximum_storage_mb > 0).then(|| self.maximum_storage_mb * 1024 * 1024)
    }

    /// Location of the checkpoint image, `None` for volatile stores
    pub fn checkpoint_path(&self) -> Option<PathBuf> {
        if self.is_volatile {
            return None;
        }
        self.path.as_ref().map(|p| p.join(CHECKPOINT_FILE_NAME))
    }
}

/// Full configuration of a keyed store.
///
/// # Example
///
/// ```toml
/// partition_id = "6f1c8f36-3c9e-4c55-9a47-2d3f0a8e9b11"
/// replica_id = 1
///
/// [storage]
/// is_volatile = true
/// maximum_memory_mb = 64
///
/// [key_comparison]
/// data_type = "Int32"
/// maximum_key_size = 4
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtreeConfiguration {
    /// Partition this store belongs to
    #[serde(default)]
    pub partition_id: PartitionId,
    /// Replica this store belongs to
    #[serde(default)]
    pub replica_id: ReplicaId,
    /// Storage ceilings and persistence
    #[serde(default)]
    pub storage: BtreeStorageConfiguration,
    /// Key ordering
    #[serde(default)]
    pub key_comparison: KeyComparisonDescription,
}

impl Default for BtreeConfiguration {
    fn default() -> Self {
        Self {
            partition_id: PartitionId::new(),
            replica_id: ReplicaId::default(),
            storage: BtreeStorageConfiguration::default(),
            key_comparison: KeyComparisonDescription::default(),
        }
    }
}

impl BtreeConfiguration {
    /// Volatile configuration with the given key ordering
    pub fn volatile(key_comparison: KeyComparisonDescription) -> Self {
        Self {
            key_comparison,
            ..Self::default()
        }
    }

    /// Check the configuration is consistent
    ///
    /// # Errors
    /// `InvalidConfiguration` when the key descriptor is invalid, a persisted
    /// store has no path, the page size is zero, or the maximum key size
    /// exceeds one page.
    pub fn validate(&self) -> Result<()> {
        self.key_comparison.validate()?;
        let storage = &self.storage;
        if !storage.is_volatile && storage.path.is_none() {
            return Err(Error::InvalidConfiguration(
                "persisted store requires a storage path".to_string(),
            ));
        }
        if storage.maximum_page_size_kb == 0 {
            return Err(Error::InvalidConfiguration(
                "maximum page size must be greater than zero".to_string(),
            ));
        }
        if self.key_comparison.maximum_key_size as u64 > storage.page_size_bytes() {
            return Err(Error::InvalidConfiguration(format!(
                "maximum key size {} exceeds page size {}",
                self.key_comparison.maximum_key_size,
                storage.page_size_bytes()
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Keyed store configuration
#
# Identity; partition_id defaults to a fresh UUID when omitted.
# partition_id = "00000000-0000-0000-0000-000000000000"
replica_id = 0

[storage]
# Volatile stores keep everything in memory; persisted stores need a path.
is_volatile = true
# path = "/var/lib/relistore/partition-0"

# Ceilings; 0 means unlimited.
maximum_memory_mb = 0
maximum_storage_mb = 0
maximum_page_size_kb = 8

store_data_inline = true
retries_before_timeout = 3

[key_comparison]
# Binary, Byte, Char, DateTime, TimeSpan, Int16, UInt16, Int32, UInt32,
# Int64, UInt64, Single, Double, Guid, String, Utf8String
data_type = "Binary"
maximum_key_size = 1024
is_fixed_length = false
# culture = "en-US"
"#
    }

    /// Parse config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the text cannot be parsed.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::InvalidConfiguration(format!("Failed to parse config: {}", e)))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfiguration(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            Error::InvalidConfiguration(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
