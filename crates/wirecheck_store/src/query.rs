//! Queries resolved from deferred invocation chains.
//!
//! A query value is an [`Invocation`] chain such as
//! `Person.where(...).limit(2)` or `company.departments.where(...)`. The
//! root is either a class or a document whose first link names a
//! referenced collection; every later link refines the query.

use crate::server::Document;
use indexmap::IndexMap;
use serde_json::Value as J;
use wirecheck_core::{
    CallError, CoreError, EntitySchema, Invocation, RelationKind, TypeRegistry, Value,
};

/// Messages that refine a query instead of running it
pub const REFINEMENTS: &[&str] = &["all", "where", "limit", "skip", "order_by", "asc", "desc"];

/// What a query selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    /// Domain type of the results
    pub model: String,
    /// Collection searched
    pub collection: String,
    /// Selector
    pub filter: Document,
    /// Sort order, `{field: 1 | -1}`
    pub sort: Option<Document>,
    /// Documents skipped
    pub skip: Option<i64>,
    /// Maximum documents returned
    pub limit: Option<i64>,
}

impl QuerySpec {
    /// Everything in the type's collection
    #[must_use]
    pub fn new(schema: &EntitySchema) -> Self {
        Self {
            model: schema.name.clone(),
            collection: schema.collection.clone(),
            filter: Document::new(),
            sort: None,
            skip: None,
            limit: None,
        }
    }

    /// Merge more conditions into the selector
    #[must_use]
    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter.extend(filter);
        self
    }

    /// Resolve a deferred chain against the registry
    ///
    /// # Errors
    ///
    /// Fails when the root is not a class or a persisted document, when a
    /// link is not a known refinement, or when an argument has the wrong shape
    pub fn resolve(registry: &TypeRegistry, invocation: &Invocation) -> Result<Self, CallError> {
        let links = invocation.chain();
        let (mut spec, refinements) = match invocation.root() {
            Value::Class(model) => (Self::new(&registry.resolve(model)?), &links[..]),
            Value::Entity(owner) => {
                let (accessor, _) = links[0];
                let schema = registry.resolve(owner.type_name())?;
                let relation = schema
                    .relation(accessor)
                    .filter(|r| r.kind == RelationKind::Many)
                    .ok_or_else(|| CallError::NoMethod {
                        receiver: owner.type_name().to_string(),
                        message: accessor.to_string(),
                    })?;
                let foreign_key = relation.foreign_key.as_ref().ok_or_else(|| {
                    CoreError::format(format!("{}.{} has no foreign key", schema.name, accessor))
                })?;
                let owner_id = owner.id().ok_or_else(|| {
                    CoreError::state(format!("{} {} has no document id", owner.type_name(), owner.key()))
                })?;

                let mut spec = Self::new(&registry.resolve(&relation.target)?);
                spec.filter.insert(foreign_key.clone(), owner_id.to_extended_json());
                (spec, &links[1..])
            }
            other => {
                return Err(CallError::NoMethod {
                    receiver: other.describe(),
                    message: invocation.message.clone(),
                });
            }
        };

        for (message, args) in refinements {
            spec.refine(message, args)?;
        }
        Ok(spec)
    }

    fn refine(&mut self, message: &str, args: &[Value]) -> Result<(), CallError> {
        match message {
            "all" => {}
            "where" => {
                let filter = document_arg(message, args.first())?;
                self.filter.extend(filter);
            }
            "limit" => self.limit = Some(int_arg(message, args.first())?),
            "skip" => self.skip = Some(int_arg(message, args.first())?),
            "order_by" => {
                let sort = self.sort.get_or_insert_with(Document::new);
                match args.first() {
                    Some(Value::Map(fields)) => {
                        for (field, direction) in fields {
                            sort.insert(field.clone(), J::from(direction_of(message, direction)?));
                        }
                    }
                    Some(Value::String(field) | Value::Symbol(field)) => {
                        sort.insert(field.clone(), J::from(1));
                    }
                    _ => return Err(argument(message, "expected a field or a sort document")),
                }
            }
            "asc" | "desc" => {
                let direction = if message == "asc" { 1 } else { -1 };
                let sort = self.sort.get_or_insert_with(Document::new);
                for field in args {
                    let field = field
                        .as_str()
                        .ok_or_else(|| argument(message, "expected field names"))?;
                    sort.insert(field.to_string(), J::from(direction));
                }
            }
            other => {
                return Err(CallError::NoMethod {
                    receiver: format!("query on {}", self.model),
                    message: other.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Sort order for `first` (ascending) or `last` (reversed), defaulting
    /// to `_id`
    #[must_use]
    pub fn edge_sort(&self, reverse: bool) -> Document {
        let mut sort = self.sort.clone().unwrap_or_else(|| {
            let mut by_id = Document::new();
            by_id.insert("_id".to_string(), J::from(1));
            by_id
        });
        if reverse {
            for direction in sort.values_mut() {
                let flipped = -direction.as_i64().unwrap_or(1);
                *direction = J::from(flipped);
            }
        }
        sort
    }

    /// The selector as a JSON value
    #[must_use]
    pub fn filter_json(&self) -> J {
        J::Object(self.filter.clone())
    }
}

fn argument(message: &str, reason: &str) -> CallError {
    CallError::Argument {
        message: message.to_string(),
        reason: reason.to_string(),
    }
}

/// A document argument; absent or nil means the empty document
pub(crate) fn document_arg(message: &str, value: Option<&Value>) -> Result<Document, CallError> {
    match value {
        None | Some(Value::Null) => Ok(Document::new()),
        Some(Value::Map(entries)) => match Value::Map(entries.clone()).to_json()? {
            J::Object(doc) => Ok(doc),
            _ => Err(argument(message, "expected a document")),
        },
        Some(other) => Err(argument(
            message,
            &format!("expected a document, got {}", other.describe()),
        )),
    }
}

/// A keyword-style map argument
pub(crate) fn map_arg<'a>(
    message: &str,
    value: Option<&'a Value>,
) -> Result<&'a IndexMap<String, Value>, CallError> {
    value
        .and_then(Value::as_map)
        .ok_or_else(|| argument(message, "expected a map of fields"))
}

fn int_arg(message: &str, value: Option<&Value>) -> Result<i64, CallError> {
    value
        .and_then(Value::as_int)
        .ok_or_else(|| argument(message, "expected an integer"))
}

fn direction_of(message: &str, value: &Value) -> Result<i64, CallError> {
    match value {
        Value::Int(n) if *n != 0 => Ok(n.signum()),
        Value::String(s) | Value::Symbol(s) => match s.as_str() {
            "asc" | "ascending" => Ok(1),
            "desc" | "descending" => Ok(-1),
            _ => Err(argument(message, "unknown sort direction")),
        },
        _ => Err(argument(message, "unknown sort direction")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::playground;
    use serde_json::json;
    use wirecheck_core::{Entity, ObjectId};

    fn person_query() -> Value {
        let people = Value::Class("Person".into());
        let adults = Value::deferred(
            people,
            "where",
            vec![Value::map([("age", Value::map([("$gte", Value::Int(18))]))])],
        );
        let sorted = Value::deferred(adults, "desc", vec![Value::Symbol("age".into())]);
        Value::deferred(sorted, "limit", vec![Value::Int(2)])
    }

    #[test]
    fn test_resolve_class_chain() {
        let registry = playground().unwrap();
        let Value::Deferred(query) = person_query() else {
            panic!("expected a deferred value");
        };
        let spec = QuerySpec::resolve(&registry, &query).unwrap();
        assert_eq!(spec.collection, "people");
        assert_eq!(spec.filter_json(), json!({"age": {"$gte": 18}}));
        assert_eq!(spec.sort, Some(json!({"age": -1}).as_object().unwrap().clone()));
        assert_eq!(spec.limit, Some(2));
        assert_eq!(J::Object(spec.edge_sort(true)), json!({"age": 1}));
    }

    #[test]
    fn test_resolve_relation_collection() {
        let registry = playground().unwrap();
        let id = ObjectId::from_bytes([7; 12]);
        let company = Entity::with_id("Company", id);
        let departments = Invocation::new(Value::Entity(company), "departments");
        let spec = QuerySpec::resolve(&registry, &departments).unwrap();
        assert_eq!(spec.model, "Department");
        assert_eq!(spec.filter_json(), json!({"company_id": id.to_extended_json()}));
        assert_eq!(J::Object(spec.edge_sort(false)), json!({"_id": 1}));
    }

    #[test]
    fn test_resolve_rejects_unknown_links() {
        let registry = playground().unwrap();
        let company = Entity::with_id("Company", ObjectId::new());
        let bad_root = Invocation::new(Value::Entity(company), "name");
        assert!(matches!(
            QuerySpec::resolve(&registry, &bad_root),
            Err(CallError::NoMethod { .. })
        ));

        let bad_link = Invocation::new(
            Value::deferred(Value::Class("Person".into()), "all", vec![]),
            "pluck",
        );
        assert!(matches!(
            QuerySpec::resolve(&registry, &bad_link),
            Err(CallError::NoMethod { .. })
        ));

        let unsaved = Entity::new("Company", "draft");
        let orphan = Invocation::new(Value::Entity(unsaved), "departments");
        assert!(matches!(
            QuerySpec::resolve(&registry, &orphan),
            Err(CallError::Core(e)) if e.is_state()
        ));
    }

    #[test]
    fn test_document_arg() {
        assert!(document_arg("where", None).unwrap().is_empty());
        assert!(document_arg("where", Some(&Value::Int(1))).is_err());
        let doc = document_arg("where", Some(&Value::map([("given", Value::string("Ada"))]))).unwrap();
        assert_eq!(J::Object(doc), json!({"given": "Ada"}));
    }
}
