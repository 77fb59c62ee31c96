//! In-memory command server.
//!
//! Understands the handful of commands the client sends: `insert`, `find`,
//! `count`, `aggregate`, `update`, `delete`, plus `ping`. Filters support
//! equality, `$and`/`$or`, and the comparison operators `$eq`, `$ne`,
//! `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin` and `$exists`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as J;
use std::cmp::Ordering;
use std::sync::{PoisonError, RwLock};
use tracing::trace;
use wirecheck_core::{Command, DeliveryError, Reply, Transport};

/// A stored document
pub type Document = serde_json::Map<String, J>;

/// Server statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    /// Commands answered
    pub commands: u64,
    /// Commands rejected
    pub rejected: u64,
}

/// Document server held entirely in memory
pub struct MemoryServer {
    address: String,
    collections: RwLock<IndexMap<String, Vec<Document>>>,
    stats: RwLock<ServerStats>,
}

impl MemoryServer {
    /// Create an empty server
    #[must_use]
    pub fn new() -> Self {
        Self::with_address("memory://localhost")
    }

    /// Create an empty server reporting a specific address
    #[must_use]
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            collections: RwLock::new(IndexMap::new()),
            stats: RwLock::new(ServerStats::default()),
        }
    }

    /// Snapshot of a collection
    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of documents in a collection
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Command counters
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        *self.stats.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self, command: &Command) -> Result<Reply, String> {
        match command.name() {
            "ping" | "endSessions" => Ok(Reply::ok()),
            "insert" => self.insert(command),
            "find" => self.find(command),
            "count" => self.count(command),
            "aggregate" => self.aggregate(command),
            "update" => self.update(command),
            "delete" => self.delete(command),
            other => Err(format!("no such command: '{}'", other)),
        }
    }

    fn insert(&self, command: &Command) -> Result<Reply, String> {
        let collection = target(command)?;
        let documents = array_field(command, "documents")?;
        let mut incoming = Vec::with_capacity(documents.len());
        for doc in documents {
            let doc = doc.as_object().ok_or("documents must be objects")?;
            if !doc.contains_key("_id") {
                return Err("document is missing _id".to_string());
            }
            incoming.push(doc.clone());
        }

        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let stored = collections.entry(collection.to_string()).or_default();
        for doc in &incoming {
            if stored.iter().any(|existing| existing.get("_id") == doc.get("_id")) {
                return Err(format!("duplicate key {}", doc["_id"]));
            }
        }
        let n = incoming.len() as u64;
        stored.extend(incoming);
        Ok(Reply::count(n))
    }

    fn find(&self, command: &Command) -> Result<Reply, String> {
        let collection = target(command)?;
        let filter = object_field(command, "filter")?.unwrap_or_default();
        let mut docs = self.select(collection, &filter);
        if let Some(sort) = object_field(command, "sort")? {
            sort_documents(&mut docs, &sort);
        }
        let docs = window(docs, int_field(command, "skip"), int_field(command, "limit"));
        let docs = match object_field(command, "projection")? {
            Some(projection) => docs.iter().map(|d| project(d, &projection)).collect(),
            None => docs,
        };
        Ok(Reply::batch(docs.into_iter().map(J::Object).collect()))
    }

    fn count(&self, command: &Command) -> Result<Reply, String> {
        let collection = target(command)?;
        let filter = object_field(command, "query")?.unwrap_or_default();
        let docs = self.select(collection, &filter);
        let docs = window(docs, int_field(command, "skip"), int_field(command, "limit"));
        Ok(Reply::count(docs.len() as u64))
    }

    fn aggregate(&self, command: &Command) -> Result<Reply, String> {
        let collection = target(command)?;
        let mut docs = self.select(collection, &Document::new());
        for stage in array_field(command, "pipeline")? {
            let stage = stage.as_object().ok_or("pipeline stages must be objects")?;
            let (name, arg) = stage.iter().next().ok_or("empty pipeline stage")?;
            docs = match name.as_str() {
                "$match" => {
                    let filter = arg.as_object().ok_or("$match takes a filter")?;
                    docs.into_iter().filter(|d| matches(d, filter)).collect()
                }
                "$sort" => {
                    let spec = arg.as_object().ok_or("$sort takes a document")?;
                    sort_documents(&mut docs, spec);
                    docs
                }
                "$skip" => window(docs, arg.as_i64(), None),
                "$limit" => window(docs, None, arg.as_i64()),
                "$group" => group(&docs, arg)?,
                other => return Err(format!("unsupported pipeline stage {}", other)),
            };
        }
        Ok(Reply::batch(docs.into_iter().map(J::Object).collect()))
    }

    fn update(&self, command: &Command) -> Result<Reply, String> {
        let collection = target(command)?;
        let statements = array_field(command, "updates")?;
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let stored = collections.entry(collection.to_string()).or_default();

        let (mut matched, mut modified) = (0u64, 0u64);
        for statement in statements {
            let q = statement.get("q").and_then(J::as_object).ok_or("update needs q")?;
            let u = statement.get("u").and_then(J::as_object).ok_or("update needs u")?;
            let multi = statement.get("multi").and_then(J::as_bool).unwrap_or(false);
            for doc in stored.iter_mut().filter(|d| matches(d, q)) {
                matched += 1;
                if apply_update(doc, u)? {
                    modified += 1;
                }
                if !multi {
                    break;
                }
            }
        }
        Ok(Reply::new(
            serde_json::json!({ "n": matched, "nModified": modified, "ok": 1 }),
        ))
    }

    fn delete(&self, command: &Command) -> Result<Reply, String> {
        let collection = target(command)?;
        let statements = array_field(command, "deletes")?;
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let stored = collections.entry(collection.to_string()).or_default();

        let mut removed = 0u64;
        for statement in statements {
            let q = statement.get("q").and_then(J::as_object).ok_or("delete needs q")?;
            let single = statement.get("limit").and_then(J::as_i64) == Some(1);
            if single {
                if let Some(index) = stored.iter().position(|d| matches(d, q)) {
                    stored.remove(index);
                    removed += 1;
                }
            } else {
                let before = stored.len();
                stored.retain(|d| !matches(d, q));
                removed += (before - stored.len()) as u64;
            }
        }
        Ok(Reply::count(removed))
    }

    fn select(&self, collection: &str, filter: &Document) -> Vec<Document> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches(d, filter)).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryServer {
    fn address(&self) -> &str {
        &self.address
    }

    fn deliver(&self, command: &Command) -> Result<Reply, DeliveryError> {
        trace!(command = command.name(), "executing");
        let result = self.execute(command);
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(reply) => {
                stats.commands += 1;
                Ok(reply)
            }
            Err(message) => {
                stats.rejected += 1;
                Err(DeliveryError::Rejected { message })
            }
        }
    }
}

fn target(command: &Command) -> Result<&str, String> {
    command
        .get(command.name())
        .and_then(J::as_str)
        .ok_or_else(|| format!("{} needs a collection name", command.name()))
}

fn array_field<'a>(command: &'a Command, key: &str) -> Result<&'a Vec<J>, String> {
    command
        .get(key)
        .and_then(J::as_array)
        .ok_or_else(|| format!("{} needs an array '{}'", command.name(), key))
}

fn object_field(command: &Command, key: &str) -> Result<Option<Document>, String> {
    match command.get(key) {
        None | Some(J::Null) => Ok(None),
        Some(J::Object(map)) => Ok(Some(map.clone())),
        Some(other) => Err(format!("'{}' must be a document, got {}", key, other)),
    }
}

fn int_field(command: &Command, key: &str) -> Option<i64> {
    command.get(key).and_then(J::as_i64)
}

/// Apply skip then limit; a zero limit means no limit, a negative one is
/// taken by magnitude
fn window(docs: Vec<Document>, skip: Option<i64>, limit: Option<i64>) -> Vec<Document> {
    let skip = usize::try_from(skip.unwrap_or(0).max(0)).unwrap_or(usize::MAX);
    let limit = limit
        .map(i64::unsigned_abs)
        .filter(|n| *n > 0)
        .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
    docs.into_iter().skip(skip).take(limit).collect()
}

fn project(doc: &Document, projection: &Document) -> Document {
    let include_id = projection.get("_id").and_then(truthy).unwrap_or(true);
    let mut out = Document::new();
    if include_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id".to_string(), id.clone());
        }
    }
    for (field, flag) in projection {
        if field != "_id" && truthy(flag).unwrap_or(false) {
            if let Some(value) = doc.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
    }
    out
}

fn truthy(value: &J) -> Option<bool> {
    match value {
        J::Bool(b) => Some(*b),
        J::Number(n) => n.as_f64().map(|x| x != 0.0),
        _ => None,
    }
}

/// `{_id: <key>, <field>: {$sum: <n>}}` over all input documents
fn group(docs: &[Document], spec: &J) -> Result<Vec<Document>, String> {
    let spec = spec.as_object().ok_or("$group takes a document")?;
    if docs.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Document::new();
    for (field, accumulator) in spec {
        if field == "_id" {
            out.insert(field.clone(), accumulator.clone());
            continue;
        }
        let per_doc = accumulator
            .get("$sum")
            .and_then(J::as_i64)
            .ok_or_else(|| format!("unsupported accumulator for {}", field))?;
        out.insert(field.clone(), J::from(per_doc * docs.len() as i64));
    }
    Ok(vec![out])
}

/// Whether `doc` satisfies `filter`
#[must_use]
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => each_filter(condition).all(|sub| matches(doc, sub)),
        "$or" => each_filter(condition).any(|sub| matches(doc, sub)),
        _ => field_matches(lookup(doc, key), condition),
    })
}

fn each_filter(condition: &J) -> impl Iterator<Item = &Document> {
    condition
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(J::as_object)
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a J> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn is_operator_document(condition: &J) -> Option<&Document> {
    let ops = condition.as_object()?;
    let operators = !ops.is_empty() && ops.keys().all(|k| k.starts_with('$'));
    let object_id = ops.len() == 1 && ops.contains_key("$oid");
    (operators && !object_id).then_some(ops)
}

fn field_matches(value: Option<&J>, condition: &J) -> bool {
    match is_operator_document(condition) {
        Some(ops) => ops.iter().all(|(op, arg)| operator_matches(value, op, arg)),
        None => equals(value, condition),
    }
}

fn equals(value: Option<&J>, expected: &J) -> bool {
    match value {
        None => expected.is_null(),
        Some(J::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(v) => v == expected,
    }
}

fn operator_matches(value: Option<&J>, op: &str, arg: &J) -> bool {
    let ordered = |accept: fn(Ordering) -> bool| {
        value.and_then(|v| compare(v, arg)).is_some_and(accept)
    };
    match op {
        "$eq" => equals(value, arg),
        "$ne" => !equals(value, arg),
        "$gt" => ordered(Ordering::is_gt),
        "$gte" => ordered(Ordering::is_ge),
        "$lt" => ordered(Ordering::is_lt),
        "$lte" => ordered(Ordering::is_le),
        "$in" => arg.as_array().is_some_and(|set| set.iter().any(|c| equals(value, c))),
        "$nin" => arg.as_array().is_some_and(|set| !set.iter().any(|c| equals(value, c))),
        "$exists" => value.is_some() == arg.as_bool().unwrap_or(true),
        _ => false,
    }
}

fn compare(a: &J, b: &J) -> Option<Ordering> {
    match (a, b) {
        (J::Number(x), J::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (J::String(x), J::String(y)) => Some(x.cmp(y)),
        (J::Bool(x), J::Bool(y)) => Some(x.cmp(y)),
        (J::Object(_), J::Object(_)) => {
            let x = a.get("$oid")?.as_str()?;
            let y = b.get("$oid")?.as_str()?;
            Some(x.cmp(y))
        }
        _ => None,
    }
}

fn sort_documents(docs: &mut [Document], spec: &Document) {
    docs.sort_by(|a, b| {
        for (field, direction) in spec {
            let ordering = match (lookup(a, field), lookup(b, field)) {
                (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ordering = if direction.as_i64().unwrap_or(1) < 0 {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering.is_ne() {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Apply an update document; returns whether `doc` changed
fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, String> {
    let before = doc.clone();
    if !update.keys().any(|k| k.starts_with('$')) {
        let id = doc.get("_id").cloned();
        *doc = update.clone();
        if let Some(id) = id {
            doc.insert("_id".to_string(), id);
        }
        return Ok(*doc != before);
    }

    for (op, fields) in update {
        let fields = fields
            .as_object()
            .ok_or_else(|| format!("{} takes a document", op))?;
        for (field, arg) in fields {
            match op.as_str() {
                "$set" => {
                    doc.insert(field.clone(), arg.clone());
                }
                "$unset" => {
                    doc.remove(field);
                }
                "$inc" => {
                    let current = doc.get(field).cloned().unwrap_or(J::from(0));
                    doc.insert(field.clone(), add(&current, arg)?);
                }
                "$push" => match doc.entry(field.clone()).or_insert_with(|| J::Array(Vec::new())) {
                    J::Array(items) => items.push(arg.clone()),
                    _ => return Err(format!("$push target {} is not an array", field)),
                },
                "$pop" => match doc.get_mut(field) {
                    Some(J::Array(items)) => {
                        if arg.as_i64().unwrap_or(1) < 0 {
                            if !items.is_empty() {
                                items.remove(0);
                            }
                        } else {
                            items.pop();
                        }
                    }
                    None => {}
                    Some(_) => return Err(format!("$pop target {} is not an array", field)),
                },
                "$bit" => {
                    let current = doc.get(field).and_then(J::as_i64).unwrap_or(0);
                    doc.insert(field.clone(), J::from(bitwise(current, arg)?));
                }
                other => return Err(format!("unsupported update operator {}", other)),
            }
        }
    }
    Ok(*doc != before)
}

fn add(current: &J, delta: &J) -> Result<J, String> {
    match (current.as_i64(), delta.as_i64()) {
        (Some(a), Some(b)) => Ok(J::from(a.wrapping_add(b))),
        _ => match (current.as_f64(), delta.as_f64()) {
            (Some(a), Some(b)) => Ok(J::from(a + b)),
            _ => Err(format!("cannot increment {} by {}", current, delta)),
        },
    }
}

/// `{and|or|xor: n}` applied to an integer field
pub fn bitwise(current: i64, spec: &J) -> Result<i64, String> {
    let spec = spec.as_object().ok_or("$bit takes a document")?;
    let mut result = current;
    for (op, operand) in spec {
        let operand = operand
            .as_i64()
            .ok_or_else(|| format!("$bit {} needs an integer", op))?;
        result = match op.as_str() {
            "and" => result & operand,
            "or" => result | operand,
            "xor" => result ^ operand,
            other => return Err(format!("unsupported bitwise operation {}", other)),
        };
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(value: J) -> Document {
        value.as_object().unwrap().clone()
    }

    fn seeded() -> MemoryServer {
        let server = MemoryServer::new();
        server
            .deliver(&Command::new("insert", "people").with(
                "documents",
                json!([
                    {"_id": {"$oid": "000000000000000000000001"}, "given": "Ada", "age": 36, "tags": ["math"]},
                    {"_id": {"$oid": "000000000000000000000002"}, "given": "Grace", "age": 45},
                    {"_id": {"$oid": "000000000000000000000003"}, "given": "Alan", "age": 41},
                ]),
            ))
            .unwrap();
        server
    }

    #[test]
    fn test_insert_and_find() {
        let server = seeded();
        assert_eq!(server.len("people"), 3);
        let reply = server
            .deliver(
                &Command::new("find", "people")
                    .with("filter", json!({"age": {"$gte": 40}}))
                    .with("sort", json!({"age": -1}))
                    .with("limit", 1),
            )
            .unwrap();
        let batch = reply.first_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["given"], "Grace");
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let server = seeded();
        let err = server
            .deliver(&Command::new("insert", "people").with(
                "documents",
                json!([{"_id": {"$oid": "000000000000000000000001"}}]),
            ))
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected { .. }));
        assert_eq!(server.stats().rejected, 1);
    }

    #[test]
    fn test_count_and_aggregate_agree() {
        let server = seeded();
        let filter = json!({"age": {"$lt": 42}});
        let counted = server
            .deliver(&Command::new("count", "people").with("query", filter.clone()))
            .unwrap();
        assert_eq!(counted.n(), 2);

        let grouped = server
            .deliver(&Command::new("aggregate", "people").with(
                "pipeline",
                json!([{"$match": filter}, {"$group": {"_id": 1, "n": {"$sum": 1}}}]),
            ))
            .unwrap();
        assert_eq!(grouped.first_batch()[0]["n"], 2);
    }

    #[test]
    fn test_projection() {
        let server = seeded();
        let reply = server
            .deliver(
                &Command::new("find", "people")
                    .with("filter", json!({"given": "Ada"}))
                    .with("projection", json!({"_id": 1})),
            )
            .unwrap();
        assert_eq!(
            reply.first_batch()[0],
            json!({"_id": {"$oid": "000000000000000000000001"}})
        );
    }

    #[test]
    fn test_update_operators() {
        let server = seeded();
        let q = json!({"_id": {"$oid": "000000000000000000000001"}});
        let reply = server
            .deliver(&Command::new("update", "people").with(
                "updates",
                json!([{"q": q, "u": {"$inc": {"age": 1}, "$bit": {"flags": {"or": 5}}, "$pop": {"tags": 1}}}]),
            ))
            .unwrap();
        assert_eq!(reply.as_json()["nModified"], 1);
        let ada = &server.documents("people")[0];
        assert_eq!(ada["age"], 37);
        assert_eq!(ada["flags"], 5);
        assert_eq!(ada["tags"], json!([]));
    }

    #[test]
    fn test_delete_single_and_many() {
        let server = seeded();
        let one = server
            .deliver(&Command::new("delete", "people").with(
                "deletes",
                json!([{"q": {"age": {"$gt": 0}}, "limit": 1}]),
            ))
            .unwrap();
        assert_eq!(one.n(), 1);
        let rest = server
            .deliver(&Command::new("delete", "people").with(
                "deletes",
                json!([{"q": {}, "limit": 0}]),
            ))
            .unwrap();
        assert_eq!(rest.n(), 2);
        assert_eq!(server.len("people"), 0);
    }

    #[test]
    fn test_unknown_command() {
        let err = MemoryServer::new()
            .deliver(&Command::new("shutdown", 1))
            .unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Rejected {
                message: "no such command: 'shutdown'".into()
            }
        );
    }

    #[test]
    fn test_filter_forms() {
        let d = doc(json!({"_id": {"$oid": "aa"}, "a": 1, "tags": ["x", "y"], "n": {"given": "Ada"}}));
        assert!(matches(&d, &doc(json!({"_id": {"$oid": "aa"}}))));
        assert!(matches(&d, &doc(json!({"tags": "x"}))));
        assert!(matches(&d, &doc(json!({"n.given": "Ada"}))));
        assert!(matches(&d, &doc(json!({"a": {"$in": [1, 2]}}))));
        assert!(matches(&d, &doc(json!({"missing": null}))));
        assert!(matches(&d, &doc(json!({"missing": {"$exists": false}}))));
        assert!(matches(&d, &doc(json!({"$or": [{"a": 2}, {"a": 1}]}))));
        assert!(!matches(&d, &doc(json!({"$and": [{"a": 1}, {"a": {"$ne": 1}}]}))));
    }

    proptest! {
        #[test]
        fn prop_bitwise_matches_native(current in any::<i64>(), operand in any::<i64>()) {
            prop_assert_eq!(bitwise(current, &json!({"and": operand})).unwrap(), current & operand);
            prop_assert_eq!(bitwise(current, &json!({"or": operand})).unwrap(), current | operand);
            prop_assert_eq!(bitwise(current, &json!({"xor": operand})).unwrap(), current ^ operand);
        }

        #[test]
        fn prop_window_bounds(len in 0usize..20, skip in 0i64..25, limit in -5i64..25) {
            let docs: Vec<Document> = (0..len).map(|i| doc(json!({"i": i}))).collect();
            let out = window(docs, Some(skip), Some(limit));
            let available = len.saturating_sub(skip as usize);
            let expected = if limit == 0 { available } else { available.min(limit.unsigned_abs() as usize) };
            prop_assert_eq!(out.len(), expected);
        }
    }
}
