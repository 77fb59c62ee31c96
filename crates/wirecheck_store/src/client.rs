//! Document client: the watched API.
//!
//! [`Client`] answers [`Invoke`] calls on three kinds of receivers:
//!
//! - class references (`Person.count`, `Person.create(...)`),
//! - documents (`ada.reload`, `ada.inc(...)`, relation accessors),
//! - deferred queries (`Person.where(...).each { ... }`).
//!
//! Every round trip goes through the configured [`Transport`], with `$db`
//! (and `lsid` when sessions are on) appended to the command.

use crate::config::StoreConfig;
use crate::dialect;
use crate::query::{QuerySpec, REFINEMENTS, document_arg, map_arg};
use crate::server::{self, Document};
use indexmap::IndexMap;
use serde_json::{Value as J, json};
use std::sync::Arc;
use tracing::{debug, trace};
use wirecheck_core::{
    Block, CallError, Command, CoreError, Entity, EntityFlags, EntityRef, EntitySchema, Invocation,
    Invoke, ObjectId, RelationKind, Reply, Request, Transport, TypeRegistry, Value,
};

/// Client over a command transport
pub struct Client {
    transport: Arc<dyn Transport>,
    registry: TypeRegistry,
    config: StoreConfig,
    session: Option<J>,
}

impl Client {
    /// Create a client with the default configuration
    pub fn new(transport: Arc<dyn Transport>, registry: TypeRegistry) -> Self {
        Self::with_config(transport, registry, StoreConfig::default())
    }

    /// Create a client with a specific configuration
    pub fn with_config(
        transport: Arc<dyn Transport>,
        registry: TypeRegistry,
        config: StoreConfig,
    ) -> Self {
        let session = config
            .sessions
            .then(|| json!({ "id": ObjectId::new().to_hex() }));
        Self {
            transport,
            registry,
            config,
            session,
        }
    }

    /// Active configuration
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Domain types this client knows
    pub const fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn send(&self, command: Command) -> Result<Reply, CallError> {
        let mut command = command.with("$db", self.config.database.as_str());
        if let Some(lsid) = &self.session {
            command = command.with("lsid", lsid.clone());
        }
        trace!(command = command.name(), "sending");
        Ok(self.transport.deliver(&command)?)
    }

    fn schema(&self, model: &str) -> Result<EntitySchema, CallError> {
        Ok(self.registry.resolve(model)?)
    }

    fn fetch(&self, command: Command) -> Result<Vec<Document>, CallError> {
        let reply = self.send(command)?;
        Ok(reply
            .first_batch()
            .into_iter()
            .filter_map(|doc| match doc {
                J::Object(doc) => Some(doc),
                _ => None,
            })
            .collect())
    }

    // -- class receivers ---------------------------------------------------

    fn class_call(
        &self,
        model: &str,
        request: &Request,
        block: Option<Block<'_>>,
    ) -> Result<Value, CallError> {
        let schema = self.schema(model)?;
        let message = request.message.as_str();
        match message {
            "estimated_count" => {
                let reply = self.send(dialect::estimated_count_command(&schema.collection))?;
                Ok(count_value(reply.n()))
            }
            "find" => self.find_by_ids(&schema, request.arg(0)),
            "create" | "create!" => {
                let entity = self.build(&schema, request.arg(0))?;
                self.insert(&schema, &entity)?;
                Ok(Value::Entity(entity))
            }
            "new" => Ok(Value::Entity(self.build(&schema, request.arg(0))?)),
            _ if REFINEMENTS.contains(&message) => Ok(refined(request)),
            _ => {
                let filter = match request.arg(0) {
                    Some(Value::ObjectId(id)) => {
                        let mut by_id = Document::new();
                        by_id.insert("_id".to_string(), id.to_extended_json());
                        by_id
                    }
                    other => document_arg(message, other)?,
                };
                self.run_query(&QuerySpec::new(&schema).with_filter(filter), request, block)
            }
        }
    }

    fn find_by_ids(&self, schema: &EntitySchema, arg: Option<&Value>) -> Result<Value, CallError> {
        match arg {
            Some(Value::Array(ids)) => {
                let ids = ids
                    .iter()
                    .map(|v| object_id_arg("find", v))
                    .collect::<Result<Vec<_>, _>>()?;
                let wanted: Vec<J> = ids.iter().map(ObjectId::to_extended_json).collect();
                let mut filter = Document::new();
                filter.insert("_id".to_string(), json!({ "$in": wanted }));
                let spec = QuerySpec::new(schema).with_filter(filter);
                let docs = self.fetch(dialect::find_command(&spec))?;
                if docs.len() != ids.len() {
                    return Err(not_found(schema, &spec.filter_json()));
                }
                let found = docs
                    .iter()
                    .map(|doc| self.materialize(schema, doc).map(Value::Entity))
                    .collect::<Result<_, _>>()?;
                Ok(Value::Array(found))
            }
            Some(value) => {
                let id = object_id_arg("find", value)?;
                let command = self.config.dialect.find_by_id_command(&schema.collection, id);
                let docs = self.fetch(command)?;
                let doc = docs
                    .first()
                    .ok_or_else(|| not_found(schema, &json!({ "_id": id.to_extended_json() })))?;
                Ok(Value::Entity(self.materialize(schema, doc)?))
            }
            None => Err(CallError::Argument {
                message: "find".to_string(),
                reason: "expected an id or an array of ids".to_string(),
            }),
        }
    }

    // -- queries -------------------------------------------------------------

    fn query_call(
        &self,
        query: &Invocation,
        request: &Request,
        block: Option<Block<'_>>,
    ) -> Result<Value, CallError> {
        if REFINEMENTS.contains(&request.message.as_str()) {
            return Ok(refined(request));
        }
        let spec = QuerySpec::resolve(&self.registry, query)?;
        self.run_query(&spec, request, block)
    }

    /// Terminal operations shared by classes and deferred queries
    fn run_query(
        &self,
        spec: &QuerySpec,
        request: &Request,
        block: Option<Block<'_>>,
    ) -> Result<Value, CallError> {
        let version = self.config.dialect;
        let schema = self.schema(&spec.model)?;
        match request.message.as_str() {
            "count" => {
                let reply = self.send(version.count_command(spec))?;
                Ok(count_value(version.read_count(&reply)))
            }
            "exists?" => Ok(Value::Bool(self.exists(spec)?)),
            "empty?" => Ok(Value::Bool(!self.exists(spec)?)),
            "first" | "find_by" => self.edge(&schema, spec, false),
            "last" => self.edge(&schema, spec, true),
            "find_by!" => match self.edge(&schema, spec, false)? {
                Value::Null => Err(not_found(&schema, &spec.filter_json())),
                found => Ok(found),
            },
            "each" => {
                let docs = self.fetch(dialect::find_command(spec))?;
                let entities = docs
                    .iter()
                    .map(|doc| self.materialize(&schema, doc).map(Value::Entity))
                    .collect::<Result<Vec<_>, _>>()?;
                match block {
                    Some(block) => {
                        for entity in &entities {
                            block(entity);
                        }
                        Ok(request.receiver.clone())
                    }
                    None => Ok(Value::Array(entities)),
                }
            }
            "to_a" => {
                let docs = self.fetch(dialect::find_command(spec))?;
                let entities = docs
                    .iter()
                    .map(|doc| self.materialize(&schema, doc).map(Value::Entity))
                    .collect::<Result<_, _>>()?;
                Ok(Value::Array(entities))
            }
            "create" | "create!" => {
                let entity = self.build(&schema, request.arg(0))?;
                for (field, value) in &spec.filter {
                    entity.set_attribute(field.clone(), Value::from_json(value));
                }
                self.insert(&schema, &entity)?;
                Ok(Value::Entity(entity))
            }
            "delete" | "delete_all" => {
                let command = dialect::delete_command(&spec.collection, spec.filter_json(), false);
                Ok(count_value(self.send(command)?.n()))
            }
            "destroy_all" => {
                let docs = self.fetch(dialect::find_command(spec))?;
                let mut removed = 0;
                for doc in &docs {
                    let entity = self.materialize(&schema, doc)?;
                    self.remove(&schema, &entity)?;
                    removed += 1;
                }
                Ok(count_value(removed))
            }
            other => Err(no_method(&request.receiver, other)),
        }
    }

    fn exists(&self, spec: &QuerySpec) -> Result<bool, CallError> {
        let command = self.config.dialect.exists_command(spec);
        Ok(!self.fetch(command)?.is_empty())
    }

    fn edge(&self, schema: &EntitySchema, spec: &QuerySpec, last: bool) -> Result<Value, CallError> {
        let command = dialect::find_one_command(spec, spec.edge_sort(last));
        match self.fetch(command)?.first() {
            Some(doc) => Ok(Value::Entity(self.materialize(schema, doc)?)),
            None => Ok(Value::Null),
        }
    }

    // -- document receivers ----------------------------------------------------

    fn entity_call(&self, entity: &EntityRef, request: &Request) -> Result<Value, CallError> {
        let schema = self.schema(entity.type_name())?;
        let message = request.message.as_str();
        match message {
            "delete" | "remove" | "destroy" => self.remove(&schema, entity).map(Value::Bool),
            "destroy!" => {
                if entity.flags().new_record {
                    return Err(CallError::Argument {
                        message: message.to_string(),
                        reason: "document was never persisted".to_string(),
                    });
                }
                self.remove(&schema, entity).map(Value::Bool)
            }
            "reload" => {
                self.reload(&schema, entity)?;
                Ok(Value::Entity(Arc::clone(entity)))
            }
            "insert" => {
                self.insert(&schema, entity)?;
                Ok(Value::Entity(Arc::clone(entity)))
            }
            "save" if entity.flags().new_record => {
                self.insert(&schema, entity)?;
                Ok(Value::Bool(true))
            }
            "save" | "update_document" => {
                let mut changes = self.document(&schema, entity)?;
                changes.remove("_id");
                self.update(&schema, entity, json!({ "$set": changes }))?;
                Ok(Value::Bool(true))
            }
            "inc" => self.inc(&schema, entity, request),
            "bit" => self.bit(&schema, entity, request),
            "pop" => self.pop(&schema, entity, request),
            "id" => Ok(entity.id().map_or(Value::Null, Value::ObjectId)),
            accessor if schema.is_relation(accessor) => self.relation(&schema, entity, accessor),
            field => entity
                .attribute(field)
                .ok_or_else(|| no_method(&request.receiver, field)),
        }
    }

    fn insert(&self, schema: &EntitySchema, entity: &EntityRef) -> Result<(), CallError> {
        if !entity.flags().new_record {
            return Err(CallError::Argument {
                message: "insert".to_string(),
                reason: format!("{} {} is already persisted", schema.name, entity.key()),
            });
        }
        let doc = self.document(schema, entity)?;
        let command = self.config.dialect.insert_command(&schema.collection, vec![doc]);
        self.send(command)?;
        entity.set_flags(EntityFlags::default());
        debug!(model = %schema.name, key = entity.key(), "inserted");
        Ok(())
    }

    fn remove(&self, schema: &EntitySchema, entity: &EntityRef) -> Result<bool, CallError> {
        let id = persisted_id(entity)?;
        self.send(dialect::delete_by_id_command(&schema.collection, id))?;
        entity.set_flags(EntityFlags {
            new_record: false,
            destroyed: true,
        });
        Ok(true)
    }

    fn reload(&self, schema: &EntitySchema, entity: &EntityRef) -> Result<(), CallError> {
        let id = persisted_id(entity)?;
        let command = self.config.dialect.find_by_id_command(&schema.collection, id);
        let docs = self.fetch(command)?;
        let doc = docs
            .first()
            .ok_or_else(|| not_found(schema, &json!({ "_id": id.to_extended_json() })))?;
        self.apply_document(schema, entity, doc)
    }

    fn update(&self, schema: &EntitySchema, entity: &EntityRef, update: J) -> Result<(), CallError> {
        let id = persisted_id(entity)?;
        let J::Object(update) = update else {
            return Err(CoreError::format("update must be a document").into());
        };
        self.send(self.config.dialect.update_command(&schema.collection, id, update))?;
        Ok(())
    }

    fn inc(&self, schema: &EntitySchema, entity: &EntityRef, request: &Request) -> Result<Value, CallError> {
        let fields = map_arg("inc", request.arg(0))?;
        let mut increments = Document::new();
        for (field, delta) in fields {
            let current = entity.attribute(field).unwrap_or(Value::Int(0));
            let next = match (&current, delta) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
                (Value::Int(a), Value::Float(b)) => Value::Float(*a as f64 + b),
                (Value::Float(a), Value::Int(b)) => Value::Float(a + *b as f64),
                (Value::Float(a), Value::Float(b)) => Value::Float(a + b),
                _ => {
                    return Err(CallError::Argument {
                        message: "inc".to_string(),
                        reason: format!("{} is not numeric", field),
                    });
                }
            };
            increments.insert(field.clone(), delta.to_json()?);
            entity.set_attribute(field.clone(), next);
        }
        self.update(schema, entity, json!({ "$inc": increments }))?;
        Ok(Value::Entity(Arc::clone(entity)))
    }

    fn bit(&self, schema: &EntitySchema, entity: &EntityRef, request: &Request) -> Result<Value, CallError> {
        let field = request
            .arg(0)
            .and_then(Value::as_str)
            .ok_or_else(|| CallError::Argument {
                message: "bit".to_string(),
                reason: "expected a field name".to_string(),
            })?;
        let operations = Value::Map(map_arg("bit", request.arg(1))?.clone()).to_json()?;
        let current = entity.attribute(field).and_then(|v| v.as_int()).unwrap_or(0);
        let next = server::bitwise(current, &operations).map_err(|reason| CallError::Argument {
            message: "bit".to_string(),
            reason,
        })?;
        self.update(schema, entity, json!({ "$bit": { field: operations } }))?;
        entity.set_attribute(field, Value::Int(next));
        Ok(Value::Entity(Arc::clone(entity)))
    }

    fn pop(&self, schema: &EntitySchema, entity: &EntityRef, request: &Request) -> Result<Value, CallError> {
        let fields = map_arg("pop", request.arg(0))?;
        let mut pops = Document::new();
        for (field, direction) in fields {
            let from_front = direction.as_int().unwrap_or(1) < 0;
            if let Some(Value::Array(mut items)) = entity.attribute(field) {
                if from_front && !items.is_empty() {
                    items.remove(0);
                } else {
                    items.pop();
                }
                entity.set_attribute(field.clone(), Value::Array(items));
            }
            pops.insert(field.clone(), direction.to_json()?);
        }
        self.update(schema, entity, json!({ "$pop": pops }))?;
        Ok(Value::Entity(Arc::clone(entity)))
    }

    fn relation(&self, schema: &EntitySchema, entity: &EntityRef, accessor: &str) -> Result<Value, CallError> {
        let Some(relation) = schema.relation(accessor) else {
            return Err(no_method(&Value::Entity(Arc::clone(entity)), accessor));
        };
        match relation.kind {
            RelationKind::Many => Ok(Value::deferred(Value::Entity(Arc::clone(entity)), accessor, vec![])),
            RelationKind::EmbedsOne => Ok(entity.relation(accessor).unwrap_or(Value::Null)),
            RelationKind::EmbedsMany => Ok(entity.relation(accessor).unwrap_or(Value::Array(Vec::new()))),
            RelationKind::One => {
                if let Some(loaded) = entity.relation(accessor) {
                    return Ok(loaded);
                }
                let target_id = relation
                    .foreign_key
                    .as_deref()
                    .and_then(|fk| entity.attribute(fk));
                let Some(Value::ObjectId(target_id)) = target_id else {
                    return Ok(Value::Null);
                };
                let target = self.schema(&relation.target)?;
                let command = self.config.dialect.find_by_id_command(&target.collection, target_id);
                let loaded = match self.fetch(command)?.first() {
                    Some(doc) => Value::Entity(self.materialize(&target, doc)?),
                    None => Value::Null,
                };
                entity.set_relation(accessor, loaded.clone());
                Ok(loaded)
            }
        }
    }

    // -- documents <-> entities --------------------------------------------------

    /// A fresh, unsaved document
    fn build(&self, schema: &EntitySchema, attributes: Option<&Value>) -> Result<EntityRef, CallError> {
        let entity = Entity::with_id(&schema.name, ObjectId::new());
        entity.set_flags(EntityFlags {
            new_record: true,
            destroyed: false,
        });
        let attributes = match attributes {
            None | Some(Value::Null) => return Ok(entity),
            Some(value) => map_arg("create", Some(value))?,
        };

        for (field, value) in attributes {
            let Some(relation) = schema.relation(field) else {
                entity.set_attribute(field.clone(), value.clone());
                continue;
            };
            match (relation.kind, value) {
                (_, Value::Null) => entity.set_relation(field.clone(), Value::Null),
                (RelationKind::EmbedsOne, Value::Map(attrs)) => {
                    let target = self.schema(&relation.target)?;
                    let child = embed(&target, &entity, field, None, attrs.clone());
                    entity.set_relation(field.clone(), child);
                }
                (RelationKind::EmbedsMany, Value::Array(items)) => {
                    let target = self.schema(&relation.target)?;
                    let children = items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            map_arg(field, Some(item))
                                .map(|attrs| embed(&target, &entity, field, Some(i), attrs.clone()))
                        })
                        .collect::<Result<_, _>>()?;
                    entity.set_relation(field.clone(), Value::Array(children));
                }
                (RelationKind::One, Value::Entity(target)) => {
                    let foreign_key = relation.foreign_key.as_ref().ok_or_else(|| {
                        CoreError::format(format!("{}.{} has no foreign key", schema.name, field))
                    })?;
                    entity.set_attribute(foreign_key.clone(), Value::ObjectId(persisted_id(target)?));
                    entity.set_relation(field.clone(), value.clone());
                }
                (kind, other) => {
                    return Err(CallError::Argument {
                        message: "create".to_string(),
                        reason: format!(
                            "cannot assign {} to {:?} relation {}",
                            other.describe(),
                            kind,
                            field
                        ),
                    });
                }
            }
        }
        Ok(entity)
    }

    /// The stored form of a document, embedded relations included
    fn document(&self, schema: &EntitySchema, entity: &EntityRef) -> Result<Document, CallError> {
        let mut doc = attribute_document(entity)?;
        for (accessor, relation) in &schema.relations {
            if !relation.kind.is_embedded() {
                continue;
            }
            match entity.relation(accessor) {
                Some(Value::Entity(child)) => {
                    doc.insert(accessor.clone(), J::Object(attribute_document(&child)?));
                }
                Some(Value::Array(items)) => {
                    let children = items
                        .iter()
                        .filter_map(Value::as_entity)
                        .map(|child| attribute_document(child).map(J::Object))
                        .collect::<Result<_, _>>()?;
                    doc.insert(accessor.clone(), J::Array(children));
                }
                _ => {}
            }
        }
        Ok(doc)
    }

    fn materialize(&self, schema: &EntitySchema, doc: &Document) -> Result<EntityRef, CallError> {
        let id = doc
            .get("_id")
            .and_then(ObjectId::from_extended_json)
            .ok_or_else(|| CoreError::format(format!("{} document without an _id", schema.name)))?;
        let entity = Entity::with_id(&schema.name, id);
        self.apply_document(schema, &entity, doc)?;
        Ok(entity)
    }

    fn apply_document(&self, schema: &EntitySchema, entity: &EntityRef, doc: &Document) -> Result<(), CallError> {
        let mut attributes = IndexMap::new();
        for (field, value) in doc {
            let embedded = schema.relation(field).filter(|r| r.kind.is_embedded());
            let Some(relation) = embedded else {
                attributes.insert(field.clone(), Value::from_json(value));
                continue;
            };
            let target = self.schema(&relation.target)?;
            let slot = match value {
                J::Null => Value::Null,
                J::Array(items) => Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| embed(&target, entity, field, Some(i), json_attributes(item)))
                        .collect(),
                ),
                item => embed(&target, entity, field, None, json_attributes(item)),
            };
            entity.set_relation(field.clone(), slot);
        }
        entity.replace_attributes(attributes);
        entity.set_flags(EntityFlags::default());
        Ok(())
    }
}

impl Invoke for Client {
    fn invoke(&self, request: &Request, block: Option<Block<'_>>) -> Result<Value, CallError> {
        match &request.receiver {
            Value::Class(model) => self.class_call(model, request, block),
            Value::Entity(entity) => self.entity_call(entity, request),
            Value::Deferred(query) => self.query_call(query, request, block),
            other => Err(no_method(other, &request.message)),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.transport.address())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn refined(request: &Request) -> Value {
    let link = Invocation::new(request.receiver.clone(), request.message.as_str())
        .with_args(request.args.clone());
    Value::Deferred(Box::new(link))
}

fn embed(
    target: &EntitySchema,
    owner: &EntityRef,
    field: &str,
    index: Option<usize>,
    attributes: IndexMap<String, Value>,
) -> Value {
    let key = match index {
        Some(i) => format!("{}.{}.{}", owner.key(), field, i),
        None => format!("{}.{}", owner.key(), field),
    };
    let child = Entity::new(&target.name, key);
    child.replace_attributes(attributes);
    Value::Entity(child)
}

fn json_attributes(value: &J) -> IndexMap<String, Value> {
    value
        .as_object()
        .map(|doc| doc.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
        .unwrap_or_default()
}

fn attribute_document(entity: &EntityRef) -> Result<Document, CallError> {
    let mut doc = Document::new();
    for (field, value) in entity.attributes() {
        doc.insert(field, value.to_json()?);
    }
    Ok(doc)
}

fn persisted_id(entity: &EntityRef) -> Result<ObjectId, CallError> {
    entity.id().ok_or_else(|| {
        CoreError::state(format!("{} {} has no document id", entity.type_name(), entity.key())).into()
    })
}

fn object_id_arg(message: &str, value: &Value) -> Result<ObjectId, CallError> {
    match value {
        Value::ObjectId(id) => Ok(*id),
        Value::String(hex) => ObjectId::parse_hex(hex).map_err(CallError::from),
        Value::Entity(entity) => persisted_id(entity),
        other => Err(CallError::Argument {
            message: message.to_string(),
            reason: format!("expected a document id, got {}", other.describe()),
        }),
    }
}

fn count_value(n: u64) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

fn not_found(schema: &EntitySchema, selector: &J) -> CallError {
    CallError::NotFound {
        type_name: schema.name.clone(),
        selector: selector.to_string(),
    }
}

fn no_method(receiver: &Value, message: &str) -> CallError {
    CallError::NoMethod {
        receiver: receiver.describe(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Dialect;
    use crate::models::playground;
    use crate::server::MemoryServer;
    use std::sync::Mutex;
    use wirecheck_core::{
        CommandListener, CommandStarted, Creatable, Deletable, Findable, Monitoring,
        MonitoredTransport,
    };

    #[derive(Default)]
    struct Commands(Mutex<Vec<J>>);

    impl CommandListener for Commands {
        fn started(&self, event: &CommandStarted) {
            self.0.lock().unwrap().push(event.command.to_json());
        }
    }

    fn client(dialect: Dialect) -> (Arc<MemoryServer>, Arc<Commands>, Client) {
        let server = Arc::new(MemoryServer::new());
        let monitoring = Arc::new(Monitoring::new());
        let commands = Arc::new(Commands::default());
        monitoring.subscribe(Arc::clone(&commands) as Arc<dyn CommandListener>);
        let transport = MonitoredTransport::new(Arc::clone(&server), monitoring);
        let config = StoreConfig {
            dialect,
            sessions: false,
            ..StoreConfig::default()
        };
        let client = Client::with_config(Arc::new(transport), playground().unwrap(), config);
        (server, commands, client)
    }

    fn attrs(entries: Vec<(&str, Value)>) -> IndexMap<String, Value> {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_create_and_count_per_dialect() {
        for dialect in [Dialect::V1, Dialect::V2] {
            let (server, commands, client) = client(dialect);
            client
                .create("Person", attrs(vec![("given", "Ada".into()), ("age", Value::Int(36))]))
                .unwrap();
            assert_eq!(server.len("people"), 1);
            assert_eq!(client.count("Person", None).unwrap(), 1);

            let log = commands.0.lock().unwrap();
            let expected = match dialect {
                Dialect::V1 => "count",
                Dialect::V2 => "aggregate",
            };
            assert_eq!(log[1].as_object().unwrap().keys().next().unwrap(), expected);
            assert_eq!(log[1]["$db"], "wirecheck_test");
        }
    }

    #[test]
    fn test_session_id_is_attached() {
        let server = Arc::new(MemoryServer::new());
        let client = Client::new(server, playground().unwrap());
        assert!(client.config().sessions);
        assert!(client.session.as_ref().is_some_and(|s| s["id"].is_string()));
    }

    #[test]
    fn test_relations_and_embedding() {
        let (server, _commands, client) = client(Dialect::V1);
        let acme = client.create("Company", attrs(vec![("name", "Acme".into())])).unwrap();
        let platform = client
            .create(
                "Department",
                attrs(vec![("name", "Platform".into()), ("company", Value::Entity(Arc::clone(&acme)))]),
            )
            .unwrap();
        let ada = client
            .create(
                "Person",
                attrs(vec![(
                    "name",
                    Value::map([("given", Value::string("Ada")), ("family", Value::string("Lovelace"))]),
                )]),
            )
            .unwrap();

        let stored = server.documents("people");
        assert_eq!(stored[0]["name"]["family"], "Lovelace");
        assert_eq!(
            server.documents("departments")[0]["company_id"],
            acme.id().unwrap().to_extended_json()
        );

        let departments = client
            .invoke(&Request::new(Value::Entity(Arc::clone(&acme)), "departments"), None)
            .unwrap();
        let counted = client.invoke(&Request::new(departments, "count"), None).unwrap();
        assert_eq!(counted, Value::Int(1));

        let fresh = client.find("Department", &Value::ObjectId(platform.id().unwrap())).unwrap();
        let Value::Entity(fresh) = fresh else {
            panic!("expected a document");
        };
        let company = client
            .invoke(&Request::new(Value::Entity(fresh), "company"), None)
            .unwrap();
        assert_eq!(company.as_entity().unwrap().key(), acme.key());

        client.invoke(&Request::new(Value::Entity(Arc::clone(&ada)), "reload"), None).unwrap();
        let name = ada.relation("name").unwrap();
        assert_eq!(
            name.as_entity().unwrap().attribute("given"),
            Some(Value::string("Ada"))
        );
    }

    #[test]
    fn test_atomic_updates() {
        let (server, _commands, client) = client(Dialect::V2);
        let ada = client
            .create(
                "Person",
                attrs(vec![
                    ("age", Value::Int(36)),
                    ("flags", Value::Int(0b0101)),
                    ("tags", Value::Array(vec!["a".into(), "b".into()])),
                ]),
            )
            .unwrap();
        let receiver = Value::Entity(Arc::clone(&ada));
        client
            .invoke(
                &Request::new(receiver.clone(), "inc").with_args(vec![Value::map([("age", Value::Int(1))])]),
                None,
            )
            .unwrap();
        client
            .invoke(
                &Request::new(receiver.clone(), "bit").with_args(vec![
                    Value::Symbol("flags".into()),
                    Value::map([("and", Value::Int(0b0100))]),
                ]),
                None,
            )
            .unwrap();
        client
            .invoke(
                &Request::new(receiver, "pop").with_args(vec![Value::map([("tags", Value::Int(-1))])]),
                None,
            )
            .unwrap();

        assert_eq!(ada.attribute("age"), Some(Value::Int(37)));
        assert_eq!(ada.attribute("flags"), Some(Value::Int(0b0100)));
        let stored = &server.documents("people")[0];
        assert_eq!(stored["age"], 37);
        assert_eq!(stored["flags"], 4);
        assert_eq!(stored["tags"], json!(["b"]));
    }

    #[test]
    fn test_query_each_and_deletes() {
        let (server, _commands, client) = client(Dialect::V1);
        for (given, age) in [("Ada", 36), ("Grace", 45), ("Alan", 41)] {
            client
                .create("Person", attrs(vec![("given", given.into()), ("age", Value::Int(age))]))
                .unwrap();
        }
        let older = client
            .invoke(
                &Request::new(Value::Class("Person".into()), "where")
                    .with_args(vec![Value::map([("age", Value::map([("$gt", Value::Int(40))]))])]),
                None,
            )
            .unwrap();
        assert!(matches!(older, Value::Deferred(_)));

        let mut seen = Vec::new();
        let mut block = |v: &Value| seen.push(v.as_entity().unwrap().attribute("given"));
        let returned = client
            .invoke(&Request::new(older.clone(), "each"), Some(&mut block))
            .unwrap();
        assert_eq!(returned, older);
        assert_eq!(seen.len(), 2);

        let last = client.last("Person").unwrap().unwrap();
        assert_eq!(last.attribute("given"), Some(Value::string("Alan")));

        let gone = client.invoke(&Request::new(older, "delete_all"), None).unwrap();
        assert_eq!(gone, Value::Int(2));
        assert!(client.delete(&last).unwrap());
        assert_eq!(server.len("people"), 0);
        assert!(last.flags().destroyed);
    }

    #[test]
    fn test_missing_documents() {
        let (_server, _commands, client) = client(Dialect::V1);
        let missing = ObjectId::new();
        let err = client.find("Person", &Value::ObjectId(missing)).unwrap_err();
        assert!(matches!(err, CallError::NotFound { ref type_name, .. } if type_name == "Person"));

        let by = Request::new(Value::Class("Person".into()), "find_by!")
            .with_args(vec![Value::map([("given", Value::string("Nobody"))])]);
        assert!(matches!(client.invoke(&by, None), Err(CallError::NotFound { .. })));
        let nobody = Value::map([("given", Value::string("Nobody"))]);
        assert!(client.find_by("Person", &nobody).unwrap().is_none());

        let err = client
            .invoke(&Request::new(Value::Class("Person".into()), "pluck"), None)
            .unwrap_err();
        assert!(matches!(err, CallError::NoMethod { .. }));
        assert!(client.invoke(&Request::new(Value::Int(1), "count"), None).is_err());
    }

    #[test]
    fn test_rejected_command_surfaces() {
        let (_server, _commands, client) = client(Dialect::V1);
        let ada = client.create("Person", IndexMap::new()).unwrap();
        let again = client.invoke(&Request::new(Value::Entity(Arc::clone(&ada)), "insert"), None);
        assert!(matches!(again, Err(CallError::Argument { .. })));

        ada.set_flags(EntityFlags {
            new_record: true,
            destroyed: false,
        });
        let duplicate = client.invoke(&Request::new(Value::Entity(ada), "insert"), None);
        assert!(matches!(
            duplicate,
            Err(CallError::Delivery(wirecheck_core::DeliveryError::Rejected { .. }))
        ));
    }
}
