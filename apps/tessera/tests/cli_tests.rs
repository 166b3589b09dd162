//! Command tests against a real data directory.
//!
//! Each command opens and closes the process-wide engine, so tests hold
//! `ENGINE` for their whole duration.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::tempdir;
use tessera::cli::{
    cmd_create_namespace, cmd_drop_all, cmd_drop_data, cmd_init, cmd_lease, cmd_load,
    cmd_mutate, cmd_query, cmd_schema, cmd_status,
};
use tessera::settings::{FileSettings, resolve};
use tessera_core::{Config, TesseraError};

static ENGINE: Mutex<()> = Mutex::new(());

fn config(dir: &Path) -> Config {
    Config::new(dir.join("data"))
}

fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).expect("write input");
    path
}

const HAS_NAME: &str = "{ q(func: has(name)) { name } }";

// =============================================================================
// INIT & STATUS
// =============================================================================

#[test]
fn test_init_then_status() {
    let _lock = ENGINE.lock();
    let temp = tempdir().unwrap();

    let snap = cmd_init(config(temp.path()), false, true).unwrap();
    assert_eq!(snap.next_uid, 2);
    assert_eq!(snap.next_ts, 3);

    let status = cmd_status(config(temp.path()), true).unwrap();
    assert_eq!(status.next_uid, 2);
}

#[test]
fn test_init_twice_needs_force() {
    let _lock = ENGINE.lock();
    let temp = tempdir().unwrap();
    cmd_init(config(temp.path()), false, false).unwrap();

    assert!(matches!(
        cmd_init(config(temp.path()), false, false),
        Err(TesseraError::InvalidArgument(_))
    ));

    let rdf = write(temp.path(), "m.rdf", "_:a <name> \"A\" .");
    cmd_mutate(config(temp.path()), 0, &rdf, false, false).unwrap();
    cmd_init(config(temp.path()), true, false).unwrap();

    let out = cmd_query(config(temp.path()), 0, HAS_NAME, &BTreeMap::new(), None, false).unwrap();
    assert_eq!(out.json, json!({"q": []}));
}

// =============================================================================
// MUTATE & QUERY
// =============================================================================

#[test]
fn test_mutate_and_query_across_invocations() {
    let _lock = ENGINE.lock();
    let temp = tempdir().unwrap();
    let rdf = write(
        temp.path(),
        "people.rdf",
        "_:alice <name> \"Alice\" .\n_:bob <name> \"Bob\" .\n",
    );

    let uids = cmd_mutate(config(temp.path()), 0, &rdf, false, false).unwrap();
    assert_eq!(uids.len(), 2);

    let mut vars = BTreeMap::new();
    vars.insert("who".to_string(), "Bob".to_string());
    let out = cmd_query(
        config(temp.path()),
        0,
        "query q($who: string) { q(func: eq(name, $who)) { name } }",
        &vars,
        None,
        true,
    )
    .unwrap();
    assert_eq!(out.json, json!({"q": [{"name": "Bob"}]}));

    // A second invocation continues past the first one's UIDs.
    let more = write(temp.path(), "more.json", r#"{"set_nquads": "_:carol <name> \"Carol\" ."}"#);
    let next = cmd_mutate(config(temp.path()), 0, &more, false, false).unwrap();
    assert!(next["carol"] > uids["bob"]);
}

#[test]
fn test_delete_star_from_file() {
    let _lock = ENGINE.lock();
    let temp = tempdir().unwrap();
    let rdf = write(temp.path(), "a.rdf", "_:a <name> \"A\" .");
    let uids = cmd_mutate(config(temp.path()), 0, &rdf, false, false).unwrap();

    let del = write(
        temp.path(),
        "del.rdf",
        &format!("<{}> <name> * .", uids["a"]),
    );
    cmd_mutate(config(temp.path()), 0, &del, true, false).unwrap();

    let out = cmd_query(config(temp.path()), 0, HAS_NAME, &BTreeMap::new(), None, false).unwrap();
    assert_eq!(out.json, json!({"q": []}));
}

#[test]
fn test_query_unknown_namespace_fails() {
    let _lock = ENGINE.lock();
    let temp = tempdir().unwrap();
    assert!(matches!(
        cmd_query(config(temp.path()), 9, HAS_NAME, &BTreeMap::new(), None, false),
        Err(TesseraError::NamespaceNotFound(9))
    ));
}

// =============================================================================
// NAMESPACES, SCHEMA & DROPS
// =============================================================================

#[test]
fn test_namespace_schema_and_drop_data() {
    let _lock = ENGINE.lock();
    let temp = tempdir().unwrap();
    let ns = cmd_create_namespace(config(temp.path()), false).unwrap();
    assert_eq!(ns, 1);

    let schema_file = write(temp.path(), "schema.txt", "name: string @index(exact) .\n");
    let schema = cmd_schema(config(temp.path()), ns, Some(&schema_file), false).unwrap();
    assert!(schema.iter().any(|s| s.predicate == "name"));

    let rdf = write(temp.path(), "a.rdf", "_:a <name> \"A\" .");
    cmd_mutate(config(temp.path()), ns, &rdf, false, false).unwrap();
    cmd_mutate(config(temp.path()), 0, &rdf, false, false).unwrap();

    cmd_drop_data(config(temp.path()), ns).unwrap();
    let empty = cmd_query(config(temp.path()), ns, HAS_NAME, &BTreeMap::new(), None, false).unwrap();
    assert_eq!(empty.json, json!({"q": []}));
    let kept = cmd_query(config(temp.path()), 0, HAS_NAME, &BTreeMap::new(), None, false).unwrap();
    assert_eq!(kept.json, json!({"q": [{"name": "A"}]}));

    let schema = cmd_schema(config(temp.path()), ns, None, false).unwrap();
    assert!(schema.iter().any(|s| s.predicate == "name"));
}

#[test]
fn test_drop_all_keeps_watermarks() {
    let _lock = ENGINE.lock();
    let temp = tempdir().unwrap();
    let first = cmd_lease(config(temp.path()), 5, false).unwrap();
    cmd_drop_all(config(temp.path())).unwrap();

    let second = cmd_lease(config(temp.path()), 1, false).unwrap();
    assert!(second.start_id > first.end_id);
}

#[test]
fn test_lease_zero_is_rejected() {
    let _lock = ENGINE.lock();
    let temp = tempdir().unwrap();
    assert!(matches!(
        cmd_lease(config(temp.path()), 0, false),
        Err(TesseraError::InvalidArgument(_))
    ));
}

#[test]
fn test_load_directory_into_namespace() {
    let _lock = ENGINE.lock();
    let temp = tempdir().unwrap();
    let data = temp.path().join("load");
    std::fs::create_dir(&data).unwrap();
    write(&data, "a.rdf", "_:a <name> \"A\" .");
    write(&data, "b.json", r#"[{"set_nquads": "_:b <name> \"B\" ."}]"#);
    let schema = write(temp.path(), "schema.txt", "name: string @index(exact) .\n");

    let ns = cmd_create_namespace(config(temp.path()), false).unwrap();
    let loaded = cmd_load(config(temp.path()), ns, Some(&schema), &data, true).unwrap();
    assert_eq!(loaded.len(), 2);

    let out = cmd_query(config(temp.path()), ns, HAS_NAME, &BTreeMap::new(), None, false).unwrap();
    assert_eq!(out.json, json!({"q": [{"name": "A"}, {"name": "B"}]}));
    let default = cmd_query(config(temp.path()), 0, HAS_NAME, &BTreeMap::new(), None, false).unwrap();
    assert_eq!(default.json, json!({"q": []}));
}

// =============================================================================
// SETTINGS
// =============================================================================

#[test]
fn test_settings_file_limits_queries() {
    let _lock = ENGINE.lock();
    let temp = tempdir().unwrap();
    let settings_path = write(
        temp.path(),
        "tessera.toml",
        &format!(
            "data_dir = {:?}\nquery_node_limit = 1\n",
            temp.path().join("data").to_string_lossy()
        ),
    );
    let file = FileSettings::load(&settings_path).unwrap();
    let cfg = resolve(None, Some(&file));
    assert_eq!(cfg.query_node_limit, 1);

    let rdf = write(temp.path(), "m.rdf", "_:a <name> \"A\" .\n_:b <name> \"B\" .");
    cmd_mutate(cfg.clone(), 0, &rdf, false, false).unwrap();
    assert!(matches!(
        cmd_query(cfg, 0, HAS_NAME, &BTreeMap::new(), None, false),
        Err(TesseraError::QueryLimitExceeded(1))
    ));
}
