//! Resource and database configuration.

use std::path::{Path, PathBuf};

use arbor_error::{ArborError, Result};
use arbor_pager::VersioningStrategy;
use arbor_types::limits::{DEFAULT_PAGE_CACHE_CAPACITY, DEFAULT_REVISIONS_TO_RESTORE};

/// File name of the persisted [`ResourceConfig`] inside a resource directory.
pub const RESOURCE_CONFIG_FILE: &str = "resource.json";
/// File name of a resource's page file.
pub const PAGE_FILE: &str = "pages.arbor";
/// Directory below the database root that holds one directory per resource.
pub const RESOURCES_DIR: &str = "resources";

/// Per-resource settings, fixed when the resource is created.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub versioning: VersioningStrategy,
    /// Checkpoint interval or window size of the versioning strategy.
    pub revisions_to_restore: u32,
    /// Decoded pages kept in memory (0 disables the cache).
    pub page_cache_capacity: usize,
    /// Sync the page file before and after publishing a revision.
    pub sync_on_commit: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            versioning: VersioningStrategy::default(),
            revisions_to_restore: DEFAULT_REVISIONS_TO_RESTORE,
            page_cache_capacity: DEFAULT_PAGE_CACHE_CAPACITY,
            sync_on_commit: true,
        }
    }
}

impl ResourceConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_versioning(mut self, versioning: VersioningStrategy) -> Self {
        self.versioning = versioning;
        self
    }

    #[must_use]
    pub const fn with_revisions_to_restore(mut self, revisions: u32) -> Self {
        self.revisions_to_restore = revisions;
        self
    }

    #[must_use]
    pub const fn with_page_cache_capacity(mut self, capacity: usize) -> Self {
        self.page_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.revisions_to_restore == 0 {
            return Err(ArborError::invalid_config(
                "revisions_to_restore must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| ArborError::internal(format!("encode resource config: {e}")))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(bytes)
            .map_err(|e| ArborError::invalid_config(format!("{RESOURCE_CONFIG_FILE}: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

/// Where a database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    root: PathBuf,
}

impl DatabaseConfig {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn resources_dir(&self) -> PathBuf {
        self.root.join(RESOURCES_DIR)
    }

    #[must_use]
    pub fn resource_dir(&self, name: &str) -> PathBuf {
        self.resources_dir().join(name)
    }
}

/// Reject resource names that would escape the resources directory.
pub(crate) fn validate_resource_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(ArborError::invalid_config(format!(
            "invalid resource name '{name}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ResourceConfig::default();
        assert_eq!(c.versioning, VersioningStrategy::SlidingSnapshot);
        assert_eq!(c.revisions_to_restore, 3);
        assert!(c.sync_on_commit);
        c.validate().unwrap();
    }

    #[test]
    fn json_round_trip_and_partial_documents() {
        let c = ResourceConfig::new()
            .with_versioning(VersioningStrategy::Differential)
            .with_revisions_to_restore(5)
            .with_page_cache_capacity(0);
        let json = c.to_json().unwrap();
        assert_eq!(ResourceConfig::from_json(&json).unwrap(), c);

        let partial = br#"{ "versioning": "incremental" }"#;
        let parsed = ResourceConfig::from_json(partial).unwrap();
        assert_eq!(parsed.versioning, VersioningStrategy::Incremental);
        assert_eq!(parsed.revisions_to_restore, 3);
    }

    #[test]
    fn invalid_documents_are_config_errors() {
        let err = ResourceConfig::from_json(br#"{ "revisions_to_restore": 0 }"#).unwrap_err();
        assert!(matches!(err, ArborError::InvalidConfig { .. }));
        let err = ResourceConfig::from_json(b"not json").unwrap_err();
        assert!(matches!(err, ArborError::InvalidConfig { .. }));
    }

    #[test]
    fn resource_names() {
        validate_resource_name("shop").unwrap();
        for bad in ["", "..", "a/b", ".hidden"] {
            assert!(validate_resource_name(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn resource_paths() {
        let db = DatabaseConfig::new("/data/db");
        assert_eq!(db.resource_dir("shop"), PathBuf::from("/data/db/resources/shop"));
    }
}
