//! Query evaluation against a snapshot.
//!
//! The executor is storage-agnostic: it walks the AST and pulls postings
//! through `GraphReader`. Every rendered node counts against the node limit.

use super::parser::{Block, Field, Query, RootFunc};
use crate::primitives::{REVERSE_PREFIX, TYPE_PREDICATE};
use crate::schema::{PredicateSchema, ValueType};
use crate::storage::EdgeObject;
use crate::{Context, TesseraError, Uid, Value};
use serde_json::{Map, Value as Json};

/// Read access to one namespace at one timestamp.
pub trait GraphReader {
    fn schema(&self, predicate: &str) -> Result<Option<PredicateSchema>, TesseraError>;

    /// Live objects of `subject --predicate-->`, in write order.
    fn objects(&self, subject: Uid, predicate: &str) -> Result<Vec<EdgeObject>, TesseraError>;

    /// Subjects with at least one live object for `predicate`, ascending.
    fn subjects_with(&self, predicate: &str) -> Result<Vec<Uid>, TesseraError>;
}

/// Evaluate `query`, returning `{ alias: [node, ...], ... }`.
pub fn execute(
    query: &Query,
    reader: &dyn GraphReader,
    node_limit: usize,
    ctx: &Context,
) -> Result<Json, TesseraError> {
    let mut executor = Executor {
        reader,
        ctx,
        node_limit,
        visited: 0,
    };
    let mut out = Map::new();
    for block in &query.blocks {
        let nodes = executor.block(block)?;
        out.insert(block.alias.clone(), Json::Array(nodes));
    }
    Ok(Json::Object(out))
}

struct Executor<'a> {
    reader: &'a dyn GraphReader,
    ctx: &'a Context,
    node_limit: usize,
    visited: usize,
}

impl Executor<'_> {
    fn block(&mut self, block: &Block) -> Result<Vec<Json>, TesseraError> {
        self.ctx.check()?;
        let roots = match &block.root {
            RootFunc::Has(predicate) => self.reader.subjects_with(predicate)?,
            RootFunc::Eq(predicate, literal) => self.matching(predicate, literal)?,
            RootFunc::Uid(uids) => uids.clone(),
            RootFunc::Type(name) => self.matching(TYPE_PREDICATE, name)?,
        };

        let mut nodes = Vec::new();
        for uid in roots {
            if let Some(node) = self.render(uid, &block.fields)? {
                nodes.push(Json::Object(node));
            }
        }
        Ok(nodes)
    }

    /// Subjects holding `literal` under `predicate`, compared in the
    /// predicate's type.
    fn matching(&self, predicate: &str, literal: &str) -> Result<Vec<Uid>, TesseraError> {
        let target = match self.reader.schema(predicate)?.map(|s| s.value_type) {
            Some(ValueType::Uid) => {
                return Err(TesseraError::InvalidQuery(format!(
                    "eq is not supported on uid predicate '{predicate}'"
                )));
            }
            Some(value_type) => Some(
                value_type
                    .convert(&Value::from(literal))
                    .map_err(|e| TesseraError::InvalidQuery(e.to_string()))?,
            ),
            None => None,
        };

        let mut out = Vec::new();
        for uid in self.reader.subjects_with(predicate)? {
            let hit = self
                .reader
                .objects(uid, predicate)?
                .iter()
                .any(|object| match (object, &target) {
                    (EdgeObject::Value(v), Some(t)) => v == t,
                    (EdgeObject::Value(v), None) => v.to_string() == literal,
                    _ => false,
                });
            if hit {
                out.push(uid);
            }
        }
        Ok(out)
    }

    fn visit(&mut self) -> Result<(), TesseraError> {
        self.ctx.check()?;
        self.visited += 1;
        if self.visited > self.node_limit {
            return Err(TesseraError::QueryLimitExceeded(self.node_limit));
        }
        Ok(())
    }

    fn render(&mut self, uid: Uid, fields: &[Field]) -> Result<Option<Map<String, Json>>, TesseraError> {
        self.visit()?;
        let mut node = Map::new();

        for field in fields {
            if field.name == "uid" {
                node.insert("uid".to_string(), Json::String(uid.to_string()));
                continue;
            }

            let mut objects = self.reader.objects(uid, &field.name)?;
            if objects.is_empty() {
                continue;
            }
            let list = match field.name.strip_prefix(REVERSE_PREFIX) {
                Some(_) => true,
                None => self
                    .reader
                    .schema(&field.name)?
                    .is_some_and(|s| s.list),
            };

            // Node lists render in uid order.
            if objects.iter().all(|o| matches!(o, EdgeObject::Uid(_))) {
                objects.sort_by_key(|o| match o {
                    EdgeObject::Uid(uid) => uid.value(),
                    _ => 0,
                });
            }

            let mut rendered = Vec::with_capacity(objects.len());
            for object in objects {
                match object {
                    EdgeObject::Value(value) if field.children.is_empty() => {
                        rendered.push(value.to_json());
                    }
                    EdgeObject::Uid(child) if field.children.is_empty() => {
                        let mut inner = Map::new();
                        inner.insert("uid".to_string(), Json::String(child.to_string()));
                        rendered.push(Json::Object(inner));
                    }
                    EdgeObject::Uid(child) => {
                        if let Some(inner) = self.render(child, &field.children)? {
                            rendered.push(Json::Object(inner));
                        }
                    }
                    EdgeObject::Value(_) | EdgeObject::Star => {}
                }
            }

            if rendered.is_empty() {
                continue;
            }
            let value = if list {
                Json::Array(rendered)
            } else {
                rendered.swap_remove(0)
            };
            node.insert(field.name.clone(), value);
        }

        Ok((!node.is_empty()).then_some(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use serde_json::json;
    use std::collections::BTreeMap;

    /// In-memory reader: (subject, predicate) -> objects.
    #[derive(Default)]
    struct Fixture {
        schema: BTreeMap<String, PredicateSchema>,
        postings: BTreeMap<(String, u64), Vec<EdgeObject>>,
    }

    impl Fixture {
        fn with_schema(mut self, predicate: &str, value_type: ValueType, list: bool) -> Self {
            let mut schema = PredicateSchema::new(predicate, value_type);
            schema.list = list;
            self.schema.insert(predicate.to_string(), schema);
            self
        }

        fn with(mut self, subject: u64, predicate: &str, object: EdgeObject) -> Self {
            self.postings
                .entry((predicate.to_string(), subject))
                .or_default()
                .push(object);
            self
        }
    }

    impl GraphReader for Fixture {
        fn schema(&self, predicate: &str) -> Result<Option<PredicateSchema>, TesseraError> {
            Ok(self.schema.get(predicate).cloned())
        }

        fn objects(&self, subject: Uid, predicate: &str) -> Result<Vec<EdgeObject>, TesseraError> {
            Ok(self
                .postings
                .get(&(predicate.to_string(), subject.value()))
                .cloned()
                .unwrap_or_default())
        }

        fn subjects_with(&self, predicate: &str) -> Result<Vec<Uid>, TesseraError> {
            Ok(self
                .postings
                .keys()
                .filter(|(p, _)| p == predicate)
                .map(|(_, s)| Uid(*s))
                .collect())
        }
    }

    fn text(s: &str) -> EdgeObject {
        EdgeObject::Value(Value::from(s))
    }

    fn people() -> Fixture {
        Fixture::default()
            .with_schema("name", ValueType::String, false)
            .with_schema("age", ValueType::Int, false)
            .with_schema("friend", ValueType::Uid, true)
            .with_schema(TYPE_PREDICATE, ValueType::String, true)
            .with(2, "name", text("Alice"))
            .with(2, "age", EdgeObject::Value(Value::Int(30)))
            .with(2, TYPE_PREDICATE, text("Person"))
            .with(3, "name", text("Bob"))
            .with(2, "friend", EdgeObject::Uid(Uid(4)))
            .with(2, "friend", EdgeObject::Uid(Uid(3)))
    }

    fn run(fixture: &Fixture, query: &str, limit: usize) -> Result<Json, TesseraError> {
        let parsed = parse(query, &BTreeMap::new())?;
        execute(&parsed, fixture, limit, &Context::background())
    }

    #[test]
    fn renders_scalars_and_nested_nodes() {
        let out = run(
            &people(),
            "{ q(func: eq(name, \"Alice\")) { uid name age friend { name } } }",
            100,
        )
        .expect("query");
        // 0x4 has no name, so its nested object is empty and omitted.
        assert_eq!(
            out,
            json!({"q": [{"uid": "0x2", "name": "Alice", "age": 30, "friend": [{"name": "Bob"}]}]})
        );
    }

    #[test]
    fn eq_compares_in_predicate_type() {
        let out = run(&people(), "{ q(func: eq(age, 30)) { name } }", 100).expect("query");
        assert_eq!(out, json!({"q": [{"name": "Alice"}]}));

        let err = run(&people(), "{ q(func: eq(age, old)) { name } }", 100).expect_err("type");
        assert!(matches!(err, TesseraError::InvalidQuery(_)));
    }

    #[test]
    fn type_function_reads_type_predicate() {
        let out = run(&people(), "{ q(func: type(Person)) { uid } }", 100).expect("query");
        assert_eq!(out, json!({"q": [{"uid": "0x2"}]}));
    }

    #[test]
    fn uid_objects_without_selection_render_as_uid_refs() {
        let out = run(&people(), "{ q(func: uid(0x2)) { friend } }", 100).expect("query");
        assert_eq!(
            out,
            json!({"q": [{"friend": [{"uid": "0x3"}, {"uid": "0x4"}]}]})
        );
    }

    #[test]
    fn node_limit_is_enforced() {
        let err = run(&people(), "{ q(func: has(name)) { name friend { uid } } }", 2)
            .expect_err("limit");
        assert!(matches!(err, TesseraError::QueryLimitExceeded(2)));
    }

    #[test]
    fn cancelled_context_aborts() {
        let parsed = parse("{ q(func: has(name)) { name } }", &BTreeMap::new()).expect("parse");
        let ctx = Context::background();
        ctx.cancel();
        assert!(matches!(
            execute(&parsed, &people(), 100, &ctx),
            Err(TesseraError::Cancelled)
        ));
    }
}
