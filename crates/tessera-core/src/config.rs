//! # Engine Configuration
//!
//! `Config` is validated once, at engine construction. A missing data
//! directory is a hard construction error; so are zero-sized lease blocks and
//! a zero query limit.

use crate::TesseraError;
use crate::primitives::{
    NAMESPACE_LEASE_BLOCK, QUERY_NODE_LIMIT, TS_LEASE_BLOCK, UID_LEASE_BLOCK,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime configuration of an engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the database file. Required.
    pub data_dir: PathBuf,
    /// Upper bound on nodes rendered by one query.
    pub query_node_limit: usize,
    /// UIDs reserved per lease extension.
    pub uid_lease_block: u64,
    /// Timestamps reserved per lease extension.
    pub ts_lease_block: u64,
    /// Namespace IDs reserved per lease extension.
    pub namespace_lease_block: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            query_node_limit: QUERY_NODE_LIMIT,
            uid_lease_block: UID_LEASE_BLOCK,
            ts_lease_block: TS_LEASE_BLOCK,
            namespace_lease_block: NAMESPACE_LEASE_BLOCK,
        }
    }
}

impl Config {
    /// Default configuration rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query_node_limit(mut self, limit: usize) -> Self {
        self.query_node_limit = limit;
        self
    }

    #[must_use]
    pub fn with_uid_lease_block(mut self, block: u64) -> Self {
        self.uid_lease_block = block;
        self
    }

    #[must_use]
    pub fn with_ts_lease_block(mut self, block: u64) -> Self {
        self.ts_lease_block = block;
        self
    }

    #[must_use]
    pub fn with_namespace_lease_block(mut self, block: u64) -> Self {
        self.namespace_lease_block = block;
        self
    }

    /// Path of the database file inside the data directory.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("tessera.redb")
    }

    /// The data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Check the configuration before any storage is touched.
    pub fn validate(&self) -> Result<(), TesseraError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(TesseraError::EmptyDataDir);
        }
        if self.data_dir.is_file() {
            return Err(TesseraError::InvalidConfig(format!(
                "data directory {} is a regular file",
                self.data_dir.display()
            )));
        }
        if self.query_node_limit == 0 {
            return Err(TesseraError::InvalidConfig(
                "query node limit must be positive".to_string(),
            ));
        }
        for (name, block) in [
            ("uid", self.uid_lease_block),
            ("timestamp", self.ts_lease_block),
            ("namespace", self.namespace_lease_block),
        ] {
            if block == 0 {
                return Err(TesseraError::InvalidConfig(format!(
                    "{name} lease block must be positive"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
