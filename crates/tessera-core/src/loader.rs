//! # Bulk Loading
//!
//! Reads schema and data files from disk and applies them to a namespace.
//!
//! A data path is either one file or a directory. In a directory every
//! `.rdf`, `.nq` and `.json` file is loaded in name order, and the other
//! entries are skipped. Each file is committed as its own batch, so blank
//! labels are scoped to the file that declares them.

use crate::mutation::Mutation;
use crate::primitives::MAX_INPUT_FILE_SIZE;
use crate::{Context, Engine, Namespace, TesseraError, Uid};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File extensions picked up when loading a directory.
const DATA_EXTENSIONS: [&str; 3] = ["rdf", "nq", "json"];

// =============================================================================
// INPUT FILES
// =============================================================================

/// Validate and canonicalize an input path.
fn validate_file_path(path: &Path) -> Result<PathBuf, TesseraError> {
    let canonical = path.canonicalize().map_err(|e| {
        TesseraError::InvalidArgument(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(TesseraError::InvalidArgument(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| TesseraError::InvalidArgument(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > MAX_INPUT_FILE_SIZE {
        return Err(TesseraError::InvalidArgument(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_INPUT_FILE_SIZE
        )));
    }
    Ok(canonical)
}

/// Read a UTF-8 input file of at most `MAX_INPUT_FILE_SIZE` bytes.
pub fn read_input(path: &Path) -> Result<String, TesseraError> {
    let path = validate_file_path(path)?;
    std::fs::read_to_string(&path)
        .map_err(|e| TesseraError::InvalidArgument(format!("Read file: {}", e)))
}

/// Parse the text of a mutation file.
///
/// A JSON array holds several mutations, a JSON object holds one, and
/// anything else is N-Quad text (set, or delete when `delete` is true).
pub fn parse_mutation_file(text: &str, delete: bool) -> Result<Vec<Mutation>, TesseraError> {
    let trimmed = text.trim_start();
    let json_err = |e: serde_json::Error| TesseraError::InvalidMutation(format!("JSON: {}", e));
    if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(json_err)
    } else if trimmed.starts_with('{') {
        Ok(vec![serde_json::from_str(trimmed).map_err(json_err)?])
    } else if delete {
        Ok(vec![Mutation::new().with_del_nquads(text)])
    } else {
        Ok(vec![Mutation::new().with_set_nquads(text)])
    }
}

/// Data files under `path`, sorted. A regular file is returned as is.
fn data_files(path: &Path) -> Result<Vec<PathBuf>, TesseraError> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let entries = std::fs::read_dir(path).map_err(|e| {
        TesseraError::InvalidArgument(format!("Cannot read directory '{}': {}", path.display(), e))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry_path = entry
            .map_err(|e| TesseraError::InvalidArgument(format!("Read directory entry: {}", e)))?
            .path();
        let wanted = entry_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| DATA_EXTENSIONS.contains(&ext));
        if wanted && entry_path.is_file() {
            files.push(entry_path);
        }
    }
    files.sort();
    Ok(files)
}

// =============================================================================
// LOADING
// =============================================================================

/// Outcome of loading one data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFile {
    pub path: PathBuf,
    /// Blank label -> allocated UID, for this file's batch.
    pub uids: BTreeMap<String, Uid>,
}

impl Namespace {
    /// Apply the schema file at `schema_path`, then load `data_path`.
    pub fn load(
        &self,
        ctx: &Context,
        schema_path: &Path,
        data_path: &Path,
    ) -> Result<Vec<LoadedFile>, TesseraError> {
        let schema = read_input(schema_path)?;
        self.alter_schema(ctx, &schema)?;
        self.load_data(ctx, data_path)
    }

    /// Load a data file, or every data file of a directory.
    ///
    /// Every file is read and parsed before the first batch is committed.
    /// A commit failure stops the load; files committed before it stay.
    pub fn load_data(&self, ctx: &Context, path: &Path) -> Result<Vec<LoadedFile>, TesseraError> {
        let mut batches = Vec::new();
        for file in data_files(path)? {
            let mutations = parse_mutation_file(&read_input(&file)?, false)?;
            batches.push((file, mutations));
        }

        let mut loaded = Vec::with_capacity(batches.len());
        for (file, mutations) in batches {
            let uids = self.mutate(ctx, &mutations)?;
            tracing::debug!(
                namespace = self.id(),
                file = %file.display(),
                blanks = uids.len(),
                "file loaded"
            );
            loaded.push(LoadedFile { path: file, uids });
        }
        tracing::info!(namespace = self.id(), files = loaded.len(), "data loaded");
        Ok(loaded)
    }
}

impl Engine {
    /// `Namespace::load` on namespace `0`.
    pub fn load(
        &self,
        ctx: &Context,
        schema_path: &Path,
        data_path: &Path,
    ) -> Result<Vec<LoadedFile>, TesseraError> {
        self.default_namespace()?.load(ctx, schema_path, data_path)
    }

    /// `Namespace::load_data` on namespace `0`.
    pub fn load_data(&self, ctx: &Context, path: &Path) -> Result<Vec<LoadedFile>, TesseraError> {
        self.default_namespace()?.load_data(ctx, path)
    }
}

// =============================================================================
// TESTS
// =============================================================================
