use crate::format;
use crate::path::PathBuffer;
use crate::pool::Pool;
use crate::registry::Registry;
use crate::result::{Rejection, ValidateResult};
use crate::schema::{AdditionalProperties, Constraint, Schema, SchemaType};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// The direction data is flowing, which decides whether `readOnly` and
/// `writeOnly` properties are required.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ValidateMode {
    /// A response going from the server to a client. `writeOnly` properties
    /// are not required and must be empty if present.
    #[default]
    ReadFromServer,

    /// A request body sent by a client. `readOnly` properties are not
    /// required.
    WriteToServer,
}

/// Validates `value` against `schema`, appending every violation found to
/// `result`. Locations are written relative to `path`.
pub fn validate(
    registry: &Registry,
    schema: &Schema,
    path: &mut PathBuffer,
    mode: ValidateMode,
    value: &Value,
    result: &mut ValidateResult,
) {
    let mut vm = Vm {
        registry,
        mode,
        path,
        result,
    };

    vm.validate(schema, value);
}

struct Vm<'a> {
    registry: &'a Registry,
    mode: ValidateMode,
    path: &'a mut PathBuffer,
    result: &'a mut ValidateResult,
}

impl Vm<'_> {
    fn validate(&mut self, schema: &Schema, value: &Value) {
        if let Some(ref_) = &schema.ref_ {
            match self.registry.schema_from_ref(ref_) {
                Some(resolved) => self.validate(&resolved, value),
                None => self.push_error(value, "unable to resolve schema reference"),
            }
            return;
        }

        let matched = match schema.type_ {
            None => true,
            Some(SchemaType::Boolean) => {
                let ok = value.is_boolean();
                if !ok {
                    self.push_error(value, "expected boolean");
                }
                ok
            }
            Some(SchemaType::Integer) | Some(SchemaType::Number) => self.number(schema, value),
            Some(SchemaType::String) => self.string(schema, value),
            Some(SchemaType::Array) => self.array(schema, value),
            Some(SchemaType::Object) => self.object(schema, value),
        };

        if matched && !schema.enum_.is_empty() && !schema.enum_.iter().any(|m| same(m, value)) {
            self.push_error(value, schema.messages().get(Constraint::Enum));
        }
    }

    fn number(&mut self, schema: &Schema, value: &Value) -> bool {
        let n = match value.as_f64() {
            Some(n) => n,
            None => {
                self.push_error(value, "expected number");
                return false;
            }
        };
        if schema.type_ == Some(SchemaType::Integer) && n.fract() != 0.0 {
            self.push_error(value, "expected integer");
            return false;
        }

        let messages = schema.messages();
        if let Some(min) = schema.minimum {
            if n < min {
                self.push_error(value, messages.get(Constraint::Minimum));
            }
        }
        if let Some(min) = schema.exclusive_minimum {
            if n <= min {
                self.push_error(value, messages.get(Constraint::ExclusiveMinimum));
            }
        }
        if let Some(max) = schema.maximum {
            if n > max {
                self.push_error(value, messages.get(Constraint::Maximum));
            }
        }
        if let Some(max) = schema.exclusive_maximum {
            if n >= max {
                self.push_error(value, messages.get(Constraint::ExclusiveMaximum));
            }
        }
        if let Some(m) = schema.multiple_of {
            if m != 0.0 {
                let q = n / m;
                if (q - q.round()).abs() > 1e-9 {
                    self.push_error(value, messages.get(Constraint::MultipleOf));
                }
            }
        }
        true
    }

    fn string(&mut self, schema: &Schema, value: &Value) -> bool {
        let s = match value.as_str() {
            Some(s) => s,
            None => {
                self.push_error(value, "expected string");
                return false;
            }
        };

        let messages = schema.messages();
        if schema.min_length.is_some() || schema.max_length.is_some() {
            let len = bytecount::num_chars(s.as_bytes());
            if let Some(min) = schema.min_length {
                if len < min {
                    self.push_error(value, messages.get(Constraint::MinLength));
                }
            }
            if let Some(max) = schema.max_length {
                if len > max {
                    self.push_error(value, messages.get(Constraint::MaxLength));
                }
            }
        }

        if let Some(re) = schema.pattern_matcher() {
            if !re.is_match(s) {
                self.push_error(value, messages.get(Constraint::Pattern));
            }
        }

        if let Some(f) = &schema.format {
            if let Err(err) = format::check(f, s) {
                self.push_error(value, &err.to_string());
            }
        }

        if schema.content_encoding.as_deref() == Some("base64") && STANDARD.decode(s).is_err() {
            self.push_error(value, "expected string to be base64 encoded");
        }
        true
    }

    fn array(&mut self, schema: &Schema, value: &Value) -> bool {
        let items = match value.as_array() {
            Some(items) => items,
            None => {
                self.push_error(value, "expected array");
                return false;
            }
        };

        let messages = schema.messages();
        if let Some(min) = schema.min_items {
            if items.len() < min {
                self.push_error(value, messages.get(Constraint::MinItems));
            }
        }
        if let Some(max) = schema.max_items {
            if items.len() > max {
                self.push_error(value, messages.get(Constraint::MaxItems));
            }
        }

        if schema.unique_items {
            // Object keys serialize sorted, so equal values share one form.
            let mut seen = HashSet::with_capacity(items.len());
            if !items.iter().all(|item| seen.insert(canonical(item).to_string())) {
                self.push_error(value, "expected array items to be unique");
            }
        }

        if let Some(item_schema) = &schema.items {
            for (i, item) in items.iter().enumerate() {
                self.path.push_index(i);
                self.validate(item_schema, item);
                self.path.pop();
            }
        }
        true
    }

    fn object(&mut self, schema: &Schema, value: &Value) -> bool {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                self.push_error(value, "expected object");
                return false;
            }
        };

        let messages = schema.messages();
        if let Some(min) = schema.min_properties {
            if obj.len() < min {
                self.push_error(value, messages.get(Constraint::MinProperties));
            }
        }
        if let Some(max) = schema.max_properties {
            if obj.len() > max {
                self.push_error(value, messages.get(Constraint::MaxProperties));
            }
        }

        for (name, prop) in &schema.properties {
            let required = schema.is_required(name)
                && !(self.mode == ValidateMode::WriteToServer && prop.read_only)
                && !(self.mode == ValidateMode::ReadFromServer && prop.write_only);

            let v = match obj.get(name) {
                Some(Value::Null) if !required => continue,
                Some(v) => v,
                None => {
                    if required {
                        self.push_error(value, messages.required(name));
                    }
                    continue;
                }
            };

            self.path.push_key(name);
            if self.mode == ValidateMode::ReadFromServer && prop.write_only && !is_zero(v) {
                self.push_error(v, "write only property is non-zero");
            } else {
                self.validate(prop, v);
            }
            self.path.pop();
        }

        match &schema.additional_properties {
            Some(AdditionalProperties::Allowed(false)) => {
                for (name, v) in extra(schema, obj) {
                    self.path.push_key(name);
                    self.push_error(v, "unexpected property");
                    self.path.pop();
                }
            }
            Some(AdditionalProperties::Schema(extra_schema)) => {
                for (name, v) in obj {
                    self.path.push_key(name);
                    self.validate(extra_schema, v);
                    self.path.pop();
                }
            }
            Some(AdditionalProperties::Allowed(true)) | None => {}
        }
        true
    }

    fn push_error(&mut self, value: &Value, message: &str) {
        self.result.add(self.path, value, message);
    }
}

fn extra<'v>(
    schema: &'v Schema,
    obj: &'v Map<String, Value>,
) -> impl Iterator<Item = (&'v String, &'v Value)> {
    obj.iter()
        .filter(move |(name, _)| !schema.properties.contains_key(name.as_str()))
}

fn is_zero(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn same(member: &Value, value: &Value) -> bool {
    match (member, value) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (a.as_u64(), b.as_u64()) {
                (Some(a), Some(b)) => a == b,
                _ => a.as_f64() == b.as_f64(),
            },
        },
        _ => member == value,
    }
}

// Whole floats become integers so `1.0` and `1` serialize alike.
fn canonical(v: &Value) -> Value {
    match v {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Value::from(f as i64)
            }
            _ => v.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), canonical(v)))
                .collect(),
        ),
        _ => v.clone(),
    }
}

/// Validates values against schemas from one registry, reusing path and
/// result buffers between calls. Concurrent checks borrow separate buffers.
///
/// ```
/// use typeschema::{Describe, Field, Registry, Type, TypeRef, ValidateMode, Validator};
/// use serde_json::json;
///
/// struct Pet;
///
/// impl Describe for Pet {
///     fn describe() -> Type {
///         Type::record("Pet").field(Field::new::<String>("name").tag("minLength", "1"))
///     }
/// }
///
/// let registry = Registry::default();
/// let schema = registry.schema(TypeRef::of::<Pet>(), false, "").unwrap().unwrap();
/// let validator = Validator::new(&registry);
///
/// assert!(validator.check(&schema, ValidateMode::WriteToServer, &json!({ "name": "Rex" })).is_ok());
///
/// let rejection = validator
///     .check(&schema, ValidateMode::WriteToServer, &json!({ "name": "" }))
///     .unwrap_err();
/// assert_eq!("/name", rejection.errors[0].location);
/// ```
#[derive(Debug)]
pub struct Validator<'r> {
    registry: &'r Registry,
    paths: Pool<PathBuffer>,
    results: Pool<ValidateResult>,
}

impl<'r> Validator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Validator {
            registry,
            paths: Pool::new(),
            results: Pool::new(),
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Checks one value, returning every violation if it does not conform.
    pub fn check(
        &self,
        schema: &Schema,
        mode: ValidateMode,
        value: &Value,
    ) -> Result<(), Rejection> {
        let mut path = self.paths.acquire();
        let mut result = self.results.acquire();

        validate(self.registry, schema, &mut path, mode, value, &mut result);

        if result.is_empty() {
            return Ok(());
        }

        let errors = result.take();
        debug!(?mode, errors = errors.len(), "value rejected");
        Err(Rejection { errors })
    }
}
