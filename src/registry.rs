use crate::error::SchemaError;
use crate::schema::Schema;
use crate::synth;
use crate::types::{Type, TypeRef};
use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Serialize, Serializer};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::debug;

pub const DEFAULT_PREFIX: &str = "#/components/schemas/";

/// Chooses a schema name from a type and a caller-provided hint.
pub type Namer = dyn Fn(&Type, &str) -> String + Send + Sync;

/// Names a type after itself, or after the hint when the type is anonymous.
/// Module paths are dropped and generic arguments are folded in, so
/// `api::Page<api::Pet>` becomes `PagePet`.
pub fn default_schema_namer(ty: &Type, hint: &str) -> String {
    let name = if ty.name.is_empty() { hint } else { ty.name.as_str() };

    let mut out = String::with_capacity(name.len());
    for part in name.split(|c: char| "<>,;&[] ".contains(c)) {
        let base = part.rsplit("::").next().unwrap_or(part);
        let mut chars = base.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

enum Slot {
    Pending(ThreadId),
    Ready(Arc<Schema>),
}

struct Entry {
    ty: TypeRef,
    ref_: String,
    reference: Arc<Schema>,
    slot: Slot,
}

#[derive(Default)]
struct State {
    entries: IndexMap<String, Entry>,
    names: HashMap<TypeId, String>,
    inline: HashMap<TypeId, Option<Arc<Schema>>>,
}

enum Lookup {
    Found(Arc<Schema>),
    Wait,
    Recursive(String),
    Absent,
}

/// Maps native types to their schemas, names and references. The same
/// type always yields the same `Arc<Schema>`.
pub struct Registry {
    prefix: String,
    namer: Box<Namer>,
    state: Mutex<State>,
    published: Condvar,
    refs: RwLock<HashMap<String, Arc<Schema>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new(DEFAULT_PREFIX)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("prefix", &self.prefix)
            .field("schemas", &self.state.lock().entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Registry {
            prefix: prefix.into(),
            namer: Box::new(default_schema_namer),
            state: Mutex::new(State::default()),
            published: Condvar::new(),
            refs: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_namer<F>(mut self, namer: F) -> Self
    where
        F: Fn(&Type, &str) -> String + Send + Sync + 'static,
    {
        self.namer = Box::new(namer);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the schema for `ty`, synthesizing it on first use.
    ///
    /// With `allow_ref`, records come back as a pure `$ref` to the stored
    /// schema. `hint` names anonymous records. `Ok(None)` means the type has
    /// no schema (e.g. a channel).
    pub fn schema(
        &self,
        ty: TypeRef,
        allow_ref: bool,
        hint: &str,
    ) -> Result<Option<Arc<Schema>>, SchemaError> {
        let (ty, desc) = ty.deref();
        if desc.is_struct() {
            self.record(ty, desc, allow_ref, hint).map(Some)
        } else {
            self.inline(ty, desc, hint)
        }
    }

    fn record(
        &self,
        ty: TypeRef,
        desc: Type,
        allow_ref: bool,
        hint: &str,
    ) -> Result<Arc<Schema>, SchemaError> {
        let id = ty.id();
        let me = thread::current().id();

        let name = {
            let mut state = self.state.lock();
            loop {
                match lookup(&state, id, allow_ref, me) {
                    Lookup::Found(schema) => return Ok(schema),
                    Lookup::Recursive(name) => return Err(SchemaError::Recursive { name }),
                    Lookup::Wait => self.published.wait(&mut state),
                    Lookup::Absent => break,
                }
            }

            let name = self.unique_name(&state, &desc, hint);
            let ref_ = format!("{}{}", self.prefix, name);
            debug!(schema = %name, %ref_, "registering schema");
            state.names.insert(id, name.clone());
            state.entries.insert(
                name.clone(),
                Entry {
                    ty,
                    reference: Arc::new(Schema::reference(ref_.clone())),
                    ref_,
                    slot: Slot::Pending(me),
                },
            );
            name
        };

        let built = synth::record_schema(self, &desc, &name);

        let mut state = self.state.lock();
        let result = match built {
            Ok(schema) => {
                let schema = Arc::new(schema);
                let mut reference = None;
                if let Some(entry) = state.entries.get_mut(&name) {
                    entry.slot = Slot::Ready(schema.clone());
                    self.refs.write().insert(entry.ref_.clone(), schema.clone());
                    reference = Some(entry.reference.clone());
                }
                Ok(match reference {
                    Some(reference) if allow_ref => reference,
                    _ => schema,
                })
            }
            Err(err) => {
                debug!(schema = %name, error = %err, "schema construction failed");
                state.entries.shift_remove(&name);
                state.names.remove(&id);
                Err(err)
            }
        };
        drop(state);
        self.published.notify_all();

        result
    }

    fn inline(
        &self,
        ty: TypeRef,
        desc: Type,
        hint: &str,
    ) -> Result<Option<Arc<Schema>>, SchemaError> {
        let id = ty.id();
        if let Some(cached) = self.state.lock().inline.get(&id) {
            return Ok(cached.clone());
        }

        // First published instance wins.
        let built = synth::schema_from_type(self, &desc, hint)?.map(Arc::new);
        let mut state = self.state.lock();
        Ok(state.inline.entry(id).or_insert(built).clone())
    }

    fn unique_name(&self, state: &State, desc: &Type, hint: &str) -> String {
        let base = (self.namer)(desc, hint);
        if !state.entries.contains_key(&base) {
            return base;
        }

        let mut n = 2;
        loop {
            let candidate = format!("{}{}", base, n);
            if !state.entries.contains_key(&candidate) {
                debug!(schema = %base, renamed = %candidate, "schema name collision");
                return candidate;
            }
            n += 1;
        }
    }

    /// Resolves a `$ref`, waiting on a schema another thread is building.
    pub fn schema_from_ref(&self, ref_: &str) -> Option<Arc<Schema>> {
        if let Some(schema) = self.refs.read().get(ref_) {
            return Some(schema.clone());
        }

        let name = ref_.strip_prefix(self.prefix.as_str())?;
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let slot = state.entries.get(name).map(|entry| match &entry.slot {
                Slot::Ready(schema) => Ok(schema.clone()),
                Slot::Pending(owner) => Err(*owner),
            });
            match slot {
                Some(Ok(schema)) => return Some(schema),
                Some(Err(owner)) if owner != me => self.published.wait(&mut state),
                _ => return None,
            }
        }
    }

    pub fn type_from_ref(&self, ref_: &str) -> Option<TypeRef> {
        let name = ref_.strip_prefix(self.prefix.as_str())?;
        self.state.lock().entries.get(name).map(|entry| entry.ty)
    }

    pub fn name_from_ref<'a>(&self, ref_: &'a str) -> Option<&'a str> {
        ref_.strip_prefix(self.prefix.as_str())
    }

    /// Every finished named schema, in registration order.
    pub fn map(&self) -> IndexMap<String, Arc<Schema>> {
        self.state
            .lock()
            .entries
            .iter()
            .filter_map(|(name, entry)| match &entry.slot {
                Slot::Ready(schema) => Some((name.clone(), schema.clone())),
                Slot::Pending(_) => None,
            })
            .collect()
    }
}

fn lookup(state: &State, id: TypeId, allow_ref: bool, me: ThreadId) -> Lookup {
    let (name, entry) = match state
        .names
        .get(&id)
        .and_then(|name| state.entries.get(name).map(|entry| (name, entry)))
    {
        Some(found) => found,
        None => return Lookup::Absent,
    };

    match &entry.slot {
        _ if allow_ref => Lookup::Found(entry.reference.clone()),
        Slot::Ready(schema) => Lookup::Found(schema.clone()),
        Slot::Pending(owner) if *owner == me => Lookup::Recursive(name.clone()),
        Slot::Pending(_) => Lookup::Wait,
    }
}

impl Serialize for Registry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.map().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Describe, Field, Kind};
    use serde_json::json;

    struct Pet;

    impl Describe for Pet {
        fn describe() -> Type {
            Type::record("animals::Pet")
                .field(Field::new::<String>("name"))
                .field(Field::new::<Vec<String>>("tags").optional())
        }
    }

    struct Node;

    impl Describe for Node {
        fn describe() -> Type {
            Type::record("Node")
                .field(Field::new::<String>("value"))
                .field(Field::new::<Vec<Node>>("children").optional())
                .field(Field::new::<Option<Box<Node>>>("next").optional())
        }
    }

    #[test]
    fn same_type_same_schema() {
        let registry = Registry::default();

        let a = registry.schema(TypeRef::of::<Pet>(), false, "").unwrap().unwrap();
        let b = registry.schema(TypeRef::of::<Pet>(), false, "").unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.schema(TypeRef::of::<u32>(), false, "").unwrap().unwrap();
        let d = registry
            .schema(TypeRef::of::<Option<u32>>(), false, "")
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&c, &d));
    }

    #[test]
    fn records_by_reference() {
        let registry = Registry::default();

        let reference = registry.schema(TypeRef::of::<Pet>(), true, "").unwrap().unwrap();
        assert_eq!(
            json!({ "$ref": "#/components/schemas/Pet" }),
            serde_json::to_value(&*reference).unwrap()
        );

        let stored = registry.schema_from_ref("#/components/schemas/Pet").unwrap();
        let inline = registry.schema(TypeRef::of::<Pet>(), false, "").unwrap().unwrap();
        assert!(Arc::ptr_eq(&stored, &inline));

        assert_eq!(
            Some(TypeRef::of::<Pet>()),
            registry.type_from_ref("#/components/schemas/Pet")
        );
        assert_eq!(Some("Pet"), registry.name_from_ref("#/components/schemas/Pet"));
        assert!(registry.schema_from_ref("#/components/schemas/Missing").is_none());
        assert!(registry.type_from_ref("#/definitions/Pet").is_none());

        // Primitives never become references.
        let number = registry.schema(TypeRef::of::<f64>(), true, "").unwrap().unwrap();
        assert!(!number.is_reference());
    }

    #[test]
    fn recursive_type() {
        let registry = Registry::default();
        let node = registry.schema(TypeRef::of::<Node>(), false, "").unwrap().unwrap();

        assert_eq!(
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "value": { "type": "string" },
                    "children": {
                        "type": "array",
                        "items": { "$ref": "#/components/schemas/Node" },
                    },
                    "next": { "$ref": "#/components/schemas/Node" },
                },
                "required": ["value"],
            }),
            serde_json::to_value(&*node).unwrap()
        );
    }

    #[test]
    fn name_collisions() {
        mod other {
            use super::*;

            pub struct Pet;

            impl Describe for Pet {
                fn describe() -> Type {
                    Type::record("other::Pet").field(Field::new::<bool>("good"))
                }
            }
        }

        let registry = Registry::default();
        registry.schema(TypeRef::of::<Pet>(), true, "").unwrap();
        let second = registry
            .schema(TypeRef::of::<other::Pet>(), true, "")
            .unwrap()
            .unwrap();

        assert_eq!(Some("#/components/schemas/Pet2"), second.ref_.as_deref());
        assert_eq!(
            vec!["Pet", "Pet2"],
            registry.map().keys().map(String::as_str).collect::<Vec<_>>()
        );
    }

    #[test]
    fn anonymous_records_use_hint() {
        struct Anonymous;

        impl Describe for Anonymous {
            fn describe() -> Type {
                Type::anonymous(Kind::Struct(vec![Field::new::<i64>("count")]))
            }
        }

        let registry = Registry::default();
        registry
            .schema(TypeRef::of::<Anonymous>(), false, "listResponse")
            .unwrap();
        assert!(registry.map().contains_key("ListResponse"));
    }

    #[test]
    fn custom_namer_and_prefix() {
        let registry = Registry::new("#/definitions/")
            .with_namer(|ty, hint| format!("{}_{}", hint, ty.name.to_lowercase()));
        let reference = registry
            .schema(TypeRef::of::<Pet>(), true, "v1")
            .unwrap()
            .unwrap();

        assert_eq!(Some("#/definitions/v1_animals::pet"), reference.ref_.as_deref());
    }

    #[test]
    fn default_namer() {
        let ty = |name: &str| Type::record(name);
        assert_eq!("PagePet", default_schema_namer(&ty("api::Page<api::Pet>"), ""));
        assert_eq!("Pet", default_schema_namer(&ty("pet"), ""));
        assert_eq!(
            "TestInput",
            default_schema_namer(&Type::anonymous(Kind::Struct(vec![])), "TestInput")
        );
    }

    #[test]
    fn failed_synthesis_releases_name() {
        struct Broken;

        impl Describe for Broken {
            fn describe() -> Type {
                Type::record("Broken").field(Field::new::<String>("code").tag("pattern", "^[a-"))
            }
        }

        let registry = Registry::default();
        for _ in 0..2 {
            assert!(matches!(
                registry.schema(TypeRef::of::<Broken>(), false, ""),
                Err(SchemaError::InvalidPattern { .. })
            ));
        }
        assert!(registry.map().is_empty());
        assert!(registry.type_from_ref("#/components/schemas/Broken").is_none());
    }

    #[test]
    fn unsupported_types_have_no_schema() {
        let registry = Registry::default();
        assert!(registry
            .schema(TypeRef::of::<std::sync::mpsc::Sender<u8>>(), false, "")
            .unwrap()
            .is_none());
    }

    #[test]
    fn concurrent_first_use() {
        let registry = Registry::default();

        let schemas: Vec<Arc<Schema>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        registry
                            .schema(TypeRef::of::<Node>(), false, "")
                            .unwrap()
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for schema in &schemas[1..] {
            assert!(Arc::ptr_eq(&schemas[0], schema));
        }
        assert_eq!(1, registry.map().len());
    }

    #[test]
    fn serialize_registry() {
        let registry = Registry::default();
        registry.schema(TypeRef::of::<Pet>(), true, "").unwrap();

        assert_eq!(
            json!({
                "Pet": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "name": { "type": "string" },
                        "tags": { "type": "array", "items": { "type": "string" } },
                    },
                    "required": ["name"],
                },
            }),
            serde_json::to_value(&registry).unwrap()
        );
    }
}
