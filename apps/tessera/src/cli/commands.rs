//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands. Each
//! command opens the engine, does its work and closes the engine again, and
//! returns what it printed so callers can inspect it.

use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use tessera_core::{
    AssignedIds, Config, Context, Engine, LeaseSnapshot, LoadedFile, PredicateSchema,
    QueryResponse, TesseraError, Uid,
};

pub use tessera_core::{parse_mutation_file, read_input};

// =============================================================================
// INPUT PARSING
// =============================================================================

/// Parse `name=value` pairs into a query variable map.
pub fn parse_vars(pairs: &[String]) -> Result<BTreeMap<String, String>, TesseraError> {
    let mut vars = BTreeMap::new();
    for pair in pairs {
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            TesseraError::InvalidArgument(format!("variable '{}' is not NAME=VALUE", pair))
        })?;
        let name = name.trim();
        if name.is_empty() || name == "$" {
            return Err(TesseraError::InvalidArgument(format!(
                "variable '{}' has no name",
                pair
            )));
        }
        vars.insert(name.to_string(), value.to_string());
    }
    Ok(vars)
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the engine, run `f`, and close the engine whatever `f` returned.
pub fn with_engine<T>(
    config: Config,
    f: impl FnOnce(&Engine) -> Result<T, TesseraError>,
) -> Result<T, TesseraError> {
    let engine = Engine::open(config)?;
    let result = f(&engine);
    engine.close();
    result
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a data directory.
pub fn cmd_init(config: Config, force: bool, json_mode: bool) -> Result<LeaseSnapshot, TesseraError> {
    let existed = config.database_path().exists();
    if existed && !force {
        return Err(TesseraError::InvalidArgument(format!(
            "Data directory {} is already initialized. Use --force to drop its data.",
            config.data_dir().display()
        )));
    }

    let dir = config.data_dir().to_path_buf();
    let snapshot = with_engine(config, |engine| {
        if existed {
            engine.drop_all(&Context::background())?;
        }
        engine.lease_state()
    })?;

    if json_mode {
        print_json(&json!({
            "data_dir": dir.to_string_lossy(),
            "reset": existed,
            "next_uid": snapshot.next_uid,
            "next_ts": snapshot.next_ts,
        }));
    } else if existed {
        println!("Dropped all data in {:?}", dir);
    } else {
        println!("Initialized new data directory at {:?}", dir);
    }
    Ok(snapshot)
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show allocation watermarks and the default namespace's schema size.
pub fn cmd_status(config: Config, json_mode: bool) -> Result<LeaseSnapshot, TesseraError> {
    let dir = config.data_dir().to_path_buf();
    let (snapshot, read_ts, predicates) = with_engine(config, |engine| {
        let predicates = engine.default_namespace()?.schema()?.len();
        Ok((engine.lease_state()?, engine.read_ts()?, predicates))
    })?;

    if json_mode {
        print_json(&json!({
            "data_dir": dir.to_string_lossy(),
            "read_ts": read_ts,
            "next_uid": snapshot.next_uid,
            "max_leased_uid": snapshot.max_leased_uid,
            "next_ts": snapshot.next_ts,
            "max_leased_ts": snapshot.max_leased_ts,
            "next_namespace": snapshot.next_namespace,
            "max_leased_namespace": snapshot.max_leased_namespace,
            "predicates": predicates,
        }));
        return Ok(snapshot);
    }

    println!("Tessera Status");
    println!("==============");
    println!("Data dir:   {:?}", dir);
    println!();
    println!("Read ts:    {}", read_ts);
    println!("Next UID:   {:#x} (leased to {:#x})", snapshot.next_uid, snapshot.max_leased_uid);
    println!("Next ts:    {} (leased to {})", snapshot.next_ts, snapshot.max_leased_ts);
    println!(
        "Namespaces: {} allocated (leased to {})",
        snapshot.next_namespace, snapshot.max_leased_namespace
    );
    println!("Predicates: {} in namespace 0", predicates);
    Ok(snapshot)
}

// =============================================================================
// MUTATE COMMAND
// =============================================================================

/// Apply a mutation file to namespace `ns`.
pub fn cmd_mutate(
    config: Config,
    ns: u64,
    file: &Path,
    delete: bool,
    json_mode: bool,
) -> Result<BTreeMap<String, Uid>, TesseraError> {
    tracing::info!("Applying mutations from {:?} to namespace {}", file, ns);
    let mutations = parse_mutation_file(&read_input(file)?, delete)?;

    let uids = with_engine(config, |engine| {
        engine
            .get_namespace(ns)?
            .mutate(&Context::background(), &mutations)
    })?;

    if json_mode {
        let map: serde_json::Map<_, _> = uids
            .iter()
            .map(|(label, uid)| (label.clone(), json!(uid.to_string())))
            .collect();
        print_json(&json!({ "uids": map }));
    } else {
        println!("Committed {} mutation(s)", mutations.len());
        for (label, uid) in &uids {
            println!("  _:{} -> {}", label, uid);
        }
    }
    Ok(uids)
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Run a read-only query in namespace `ns`.
pub fn cmd_query(
    config: Config,
    ns: u64,
    text: &str,
    vars: &BTreeMap<String, String>,
    at: Option<u64>,
    json_mode: bool,
) -> Result<QueryResponse, TesseraError> {
    let response = with_engine(config, |engine| {
        let namespace = engine.get_namespace(ns)?;
        let ctx = Context::background();
        match at {
            Some(ts) => namespace.query_at(&ctx, text, vars, ts),
            None => namespace.query_with_vars(&ctx, text, vars),
        }
    })?;

    if json_mode {
        print_json(&json!({ "data": response.json, "start_ts": response.start_ts }));
    } else {
        print_json(&response.json);
    }
    Ok(response)
}

// =============================================================================
// NAMESPACE COMMANDS
// =============================================================================

/// Allocate a new namespace.
pub fn cmd_create_namespace(config: Config, json_mode: bool) -> Result<u64, TesseraError> {
    let id = with_engine(config, |engine| Ok(engine.create_namespace()?.id()))?;
    if json_mode {
        print_json(&json!({ "namespace": id }));
    } else {
        println!("Created namespace {}", id);
    }
    Ok(id)
}

/// Drop the data and schema of every namespace.
pub fn cmd_drop_all(config: Config) -> Result<(), TesseraError> {
    with_engine(config, |engine| engine.drop_all(&Context::background()))?;
    println!("Dropped all data");
    Ok(())
}

/// Drop the data of namespace `ns`.
pub fn cmd_drop_data(config: Config, ns: u64) -> Result<(), TesseraError> {
    with_engine(config, |engine| {
        engine.get_namespace(ns)?.drop_data(&Context::background())
    })?;
    println!("Dropped data of namespace {}", ns);
    Ok(())
}

/// Alter the schema of namespace `ns` from `file` (if given), then show it.
pub fn cmd_schema(
    config: Config,
    ns: u64,
    file: Option<&Path>,
    json_mode: bool,
) -> Result<Vec<PredicateSchema>, TesseraError> {
    let text = file.map(read_input).transpose()?;
    let schema = with_engine(config, |engine| {
        let namespace = engine.get_namespace(ns)?;
        if let Some(text) = &text {
            namespace.alter_schema(&Context::background(), text)?;
        }
        namespace.schema()
    })?;

    if json_mode {
        let lines: Vec<String> = schema.iter().map(ToString::to_string).collect();
        print_json(&json!({ "namespace": ns, "schema": lines }));
    } else {
        for entry in &schema {
            println!("{}", entry);
        }
    }
    Ok(schema)
}

// =============================================================================
// LOAD COMMAND
// =============================================================================

/// Apply an optional schema file, then load a data file or directory into
/// namespace `ns`.
pub fn cmd_load(
    config: Config,
    ns: u64,
    schema: Option<&Path>,
    data: &Path,
    json_mode: bool,
) -> Result<Vec<LoadedFile>, TesseraError> {
    tracing::info!("Loading {:?} into namespace {}", data, ns);
    let loaded = with_engine(config, |engine| {
        let namespace = engine.get_namespace(ns)?;
        let ctx = Context::background();
        match schema {
            Some(schema) => namespace.load(&ctx, schema, data),
            None => namespace.load_data(&ctx, data),
        }
    })?;

    let blanks: usize = loaded.iter().map(|file| file.uids.len()).sum();
    if json_mode {
        let files: Vec<_> = loaded
            .iter()
            .map(|file| {
                json!({
                    "path": file.path.to_string_lossy(),
                    "blank_nodes": file.uids.len(),
                })
            })
            .collect();
        print_json(&json!({ "namespace": ns, "files": files }));
    } else {
        println!("Loaded {} file(s), {} blank node(s)", loaded.len(), blanks);
    }
    Ok(loaded)
}

// =============================================================================
// LEASE COMMAND
// =============================================================================

/// Reserve `count` contiguous UIDs.
pub fn cmd_lease(config: Config, count: u64, json_mode: bool) -> Result<AssignedIds, TesseraError> {
    let range = with_engine(config, |engine| engine.lease_uids(count))?;
    if json_mode {
        print_json(&json!({
            "start_id": format!("{:#x}", range.start_id),
            "end_id": format!("{:#x}", range.end_id),
        }));
    } else {
        println!("Leased {:#x}..={:#x}", range.start_id, range.end_id);
    }
    Ok(range)
}

// =============================================================================
// TESTS
// =============================================================================
