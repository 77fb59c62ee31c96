//! Command construction per dialect.
//!
//! | operation       | v1                          | v2                                       |
//! |-----------------|-----------------------------|------------------------------------------|
//! | count           | `count` with `query`        | `aggregate` with `$match` + `$group`     |
//! | exists          | `find` with `limit: 1`      | same, plus `projection: {_id: 1}`        |
//! | find by id      | `find` on `_id`             | same, plus `limit: 1`, `singleBatch`     |
//! | insert / update | bare statements             | `ordered: true`, explicit `multi`/`upsert` |
//!
//! Deletes and estimated counts are identical in both.

use crate::config::Dialect;
use crate::query::QuerySpec;
use crate::server::Document;
use serde_json::{Value as J, json};
use wirecheck_core::{Command, ObjectId, Reply};

fn by_id(id: ObjectId) -> J {
    json!({ "_id": id.to_extended_json() })
}

impl Dialect {
    /// Count documents matching a query
    #[must_use]
    pub fn count_command(self, spec: &QuerySpec) -> Command {
        match self {
            Self::V1 => {
                let mut command =
                    Command::new("count", spec.collection.as_str()).with("query", spec.filter_json());
                if let Some(skip) = spec.skip {
                    command = command.with("skip", skip);
                }
                if let Some(limit) = spec.limit {
                    command = command.with("limit", limit);
                }
                command
            }
            Self::V2 => {
                let mut pipeline = vec![json!({ "$match": spec.filter_json() })];
                if let Some(skip) = spec.skip {
                    pipeline.push(json!({ "$skip": skip }));
                }
                if let Some(limit) = spec.limit {
                    pipeline.push(json!({ "$limit": limit }));
                }
                pipeline.push(json!({ "$group": { "_id": 1, "n": { "$sum": 1 } } }));
                Command::new("aggregate", spec.collection.as_str())
                    .with("pipeline", pipeline)
                    .with("cursor", json!({}))
            }
        }
    }

    /// Read the answer to [`Dialect::count_command`]
    #[must_use]
    pub fn read_count(self, reply: &Reply) -> u64 {
        match self {
            Self::V1 => reply.n(),
            Self::V2 => reply
                .first_batch()
                .first()
                .and_then(|doc| doc.get("n"))
                .and_then(J::as_u64)
                .unwrap_or(0),
        }
    }

    /// Check whether any document matches a query
    #[must_use]
    pub fn exists_command(self, spec: &QuerySpec) -> Command {
        let command = Command::new("find", spec.collection.as_str()).with("filter", spec.filter_json());
        match self {
            Self::V1 => command.with("limit", 1),
            Self::V2 => command.with("projection", json!({ "_id": 1 })).with("limit", 1),
        }
    }

    /// Fetch one document by id
    #[must_use]
    pub fn find_by_id_command(self, collection: &str, id: ObjectId) -> Command {
        let command = Command::new("find", collection).with("filter", by_id(id));
        match self {
            Self::V1 => command,
            Self::V2 => command.with("limit", 1).with("singleBatch", true),
        }
    }

    /// Insert documents
    #[must_use]
    pub fn insert_command(self, collection: &str, documents: Vec<Document>) -> Command {
        let documents: Vec<J> = documents.into_iter().map(J::Object).collect();
        let command = Command::new("insert", collection).with("documents", documents);
        match self {
            Self::V1 => command,
            Self::V2 => command.with("ordered", true),
        }
    }

    /// Apply an update document to one document by id
    #[must_use]
    pub fn update_command(self, collection: &str, id: ObjectId, update: Document) -> Command {
        let statement = match self {
            Self::V1 => json!({ "q": by_id(id), "u": update }),
            Self::V2 => json!({ "q": by_id(id), "u": update, "multi": false, "upsert": false }),
        };
        let command = Command::new("update", collection).with("updates", vec![statement]);
        match self {
            Self::V1 => command,
            Self::V2 => command.with("ordered", true),
        }
    }
}

/// Fetch the documents a query selects
#[must_use]
pub fn find_command(spec: &QuerySpec) -> Command {
    let mut command = Command::new("find", spec.collection.as_str()).with("filter", spec.filter_json());
    if let Some(sort) = &spec.sort {
        command = command.with("sort", J::Object(sort.clone()));
    }
    if let Some(skip) = spec.skip {
        command = command.with("skip", skip);
    }
    if let Some(limit) = spec.limit {
        command = command.with("limit", limit);
    }
    command
}

/// Fetch the first document in an explicit order
#[must_use]
pub fn find_one_command(spec: &QuerySpec, sort: Document) -> Command {
    let mut command = Command::new("find", spec.collection.as_str())
        .with("filter", spec.filter_json())
        .with("sort", J::Object(sort));
    if let Some(skip) = spec.skip {
        command = command.with("skip", skip);
    }
    command.with("limit", 1)
}

/// Remove documents; `single` stops after the first match
#[must_use]
pub fn delete_command(collection: &str, filter: J, single: bool) -> Command {
    let limit = i64::from(single);
    Command::new("delete", collection).with("deletes", json!([{ "q": filter, "limit": limit }]))
}

/// Remove one document by id
#[must_use]
pub fn delete_by_id_command(collection: &str, id: ObjectId) -> Command {
    delete_command(collection, by_id(id), true)
}

/// Count everything in a collection without a selector
#[must_use]
pub fn estimated_count_command(collection: &str) -> Command {
    Command::new("count", collection)
}
