//! # Settings File
//!
//! Optional TOML file with the same keys as `tessera_core::Config`. Every key
//! is optional; command line flags take priority over the file.
//!
//! ```toml
//! data_dir = "/var/lib/tessera"
//! query_node_limit = 5000
//! uid_lease_block = 10000
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tessera_core::{Config, TesseraError};

/// Data directory used when neither a flag nor the settings file names one.
pub const DEFAULT_DATA_DIR: &str = "tessera-data";

/// Maximum settings file size (64 KB).
const MAX_SETTINGS_FILE_SIZE: u64 = 64 * 1024;

/// Contents of a settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    pub data_dir: Option<PathBuf>,
    pub query_node_limit: Option<usize>,
    pub uid_lease_block: Option<u64>,
    pub ts_lease_block: Option<u64>,
    pub namespace_lease_block: Option<u64>,
}

impl FileSettings {
    /// Read and parse a settings file.
    pub fn load(path: &Path) -> Result<Self, TesseraError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            TesseraError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        if metadata.len() > MAX_SETTINGS_FILE_SIZE {
            return Err(TesseraError::InvalidConfig(format!(
                "settings file {} exceeds {} bytes",
                path.display(),
                MAX_SETTINGS_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Parse settings from TOML text.
    pub fn parse(text: &str) -> Result<Self, TesseraError> {
        toml::from_str(text).map_err(|e| TesseraError::InvalidConfig(e.to_string()))
    }
}

/// Build the engine configuration: flag, then file, then defaults.
pub fn resolve(data_dir: Option<&Path>, file: Option<&FileSettings>) -> Config {
    let file = file.cloned().unwrap_or_default();
    let dir = data_dir
        .map(Path::to_path_buf)
        .or(file.data_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    let mut config = Config::new(dir);
    if let Some(limit) = file.query_node_limit {
        config = config.with_query_node_limit(limit);
    }
    if let Some(block) = file.uid_lease_block {
        config = config.with_uid_lease_block(block);
    }
    if let Some(block) = file.ts_lease_block {
        config = config.with_ts_lease_block(block);
    }
    if let Some(block) = file.namespace_lease_block {
        config = config.with_namespace_lease_block(block);
    }
    config
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let file = FileSettings::parse("uid_lease_block = 50\n").expect("parse");
        let config = resolve(None, Some(&file));
        assert_eq!(config.uid_lease_block, 50);
        assert_eq!(config.ts_lease_block, Config::default().ts_lease_block);
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
    }

    #[test]
    fn flag_overrides_file_data_dir() {
        let file = FileSettings::parse("data_dir = \"/from/file\"").expect("parse");
        assert_eq!(
            resolve(None, Some(&file)).data_dir,
            PathBuf::from("/from/file")
        );
        assert_eq!(
            resolve(Some(Path::new("/from/flag")), Some(&file)).data_dir,
            PathBuf::from("/from/flag")
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            FileSettings::parse("lease_size = 3"),
            Err(TesseraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_block_from_file_fails_validation() {
        let file = FileSettings::parse("ts_lease_block = 0").expect("parse");
        let config = resolve(Some(Path::new("/tmp/x")), Some(&file));
        assert!(matches!(
            config.validate(),
            Err(TesseraError::InvalidConfig(_))
        ));
    }
}
