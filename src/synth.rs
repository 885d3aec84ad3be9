//! Builds schemas from type descriptors.

use crate::error::SchemaError;
use crate::registry::Registry;
use crate::schema::{AdditionalProperties, Schema, SchemaType};
use crate::types::{Field, Kind, Type, TypeRef, Width};
use serde_json::Value;
use std::any::TypeId;
use std::sync::Arc;
use tracing::warn;

const ANNOTATIONS: &[&str] = &[
    "doc",
    "format",
    "encoding",
    "default",
    "example",
    "enum",
    "minimum",
    "exclusiveMinimum",
    "maximum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minProperties",
    "maxProperties",
    "readOnly",
    "writeOnly",
    "deprecated",
];

// Annotations that describe a field rather than constrain it, and so may sit
// next to a `$ref`.
const REFERENCE_ANNOTATIONS: &[&str] = &[
    "doc",
    "default",
    "example",
    "readOnly",
    "writeOnly",
    "deprecated",
];

/// Builds the schema for a non-record type, consulting the registry for any
/// nested types. Records are built by the registry itself so that they are
/// named before their fields are visited.
///
/// Returns `Ok(None)` for types that have no schema.
pub fn schema_from_type(
    registry: &Registry,
    ty: &Type,
    hint: &str,
) -> Result<Option<Schema>, SchemaError> {
    let base = if ty.name.is_empty() { hint } else { ty.name.as_str() };

    let mut s = match &ty.kind {
        Kind::Bool => Schema::new(SchemaType::Boolean),
        Kind::Int(width) => {
            let mut s = Schema::new(SchemaType::Integer);
            s.format = Some(int_format(*width).to_owned());
            s
        }
        Kind::Uint(width) => {
            // Unsigned integers can't be negative.
            let mut s = Schema::new(SchemaType::Integer);
            s.format = Some(int_format(*width).to_owned());
            s.minimum = Some(0.0);
            s
        }
        Kind::Float32 => {
            let mut s = Schema::new(SchemaType::Number);
            s.format = Some("float".to_owned());
            s
        }
        Kind::Float64 => {
            let mut s = Schema::new(SchemaType::Number);
            s.format = Some("double".to_owned());
            s
        }
        Kind::String => Schema::new(SchemaType::String),
        Kind::Slice(elem) | Kind::Array(elem, _) if is_byte(*elem) => {
            // Bytes travel as a base64 string.
            let mut s = Schema::new(SchemaType::String);
            s.content_encoding = Some("base64".to_owned());
            s
        }
        Kind::Slice(elem) => {
            let mut s = Schema::new(SchemaType::Array);
            s.items = registry.schema(*elem, true, &format!("{}Item", base))?;
            s
        }
        Kind::Array(elem, len) => {
            let mut s = Schema::new(SchemaType::Array);
            s.items = registry.schema(*elem, true, &format!("{}Item", base))?;
            s.min_items = Some(*len);
            s.max_items = Some(*len);
            s
        }
        Kind::Map(value) => {
            let mut s = Schema::new(SchemaType::Object);
            s.additional_properties = registry
                .schema(*value, true, &format!("{}Value", base))?
                .map(AdditionalProperties::Schema);
            s
        }
        Kind::Struct(_) => record_schema(registry, ty, base)?,
        Kind::Pointer(inner) => {
            let (_, inner) = inner.deref();
            return schema_from_type(registry, &inner, hint);
        }
        Kind::Timestamp => string_format("date-time"),
        Kind::Uri => string_format("uri"),
        Kind::Ip => string_format("ipv4"),
        // Matches anything.
        Kind::Any => Schema::default(),
        Kind::Unsupported => return Ok(None),
    };

    s.precompute_messages()?;
    Ok(Some(s))
}

fn int_format(width: Width) -> &'static str {
    if width.bits() <= 32 {
        "int32"
    } else {
        "int64"
    }
}

fn is_byte(elem: TypeRef) -> bool {
    matches!(elem.describe().kind, Kind::Uint(Width::W8))
}

fn string_format(format: &str) -> Schema {
    let mut s = Schema::new(SchemaType::String);
    s.format = Some(format.to_owned());
    s
}

/// Builds an object schema with one property per resolved field. `name` is
/// the record's registered name, used to name anonymous nested records.
pub(crate) fn record_schema(
    registry: &Registry,
    ty: &Type,
    name: &str,
) -> Result<Schema, SchemaError> {
    let mut s = Schema::new(SchemaType::Object);
    let mut required = Vec::new();

    for info in collect_fields(ty, name) {
        let field = info.field;
        if field.skip {
            continue;
        }
        if s.properties.contains_key(&field.name) {
            // Overridden by an outer declaration.
            continue;
        }

        if let Some(fs) = schema_from_field(registry, &info.parent, &field)? {
            if !field.optional {
                required.push(field.name.clone());
            }
            s.properties.insert(field.name.clone(), fs);
        }
    }

    s.additional_properties = Some(AdditionalProperties::Allowed(false));
    s.required = required;
    s.precompute_messages()?;
    Ok(s)
}

/// A field along with the name of the record that declares it, which may be
/// an embedded record.
#[derive(Debug)]
struct FieldInfo {
    parent: String,
    field: Field,
}

/// Collects direct fields first, then the fields of each embedded record in
/// declaration order, recursively. The same name may appear more than once;
/// the first occurrence is the outermost declaration.
fn collect_fields(ty: &Type, parent: &str) -> Vec<FieldInfo> {
    let mut seen = Vec::new();
    let mut fields = Vec::new();
    collect_into(ty, parent, &mut seen, &mut fields);
    fields
}

fn collect_into(ty: &Type, parent: &str, seen: &mut Vec<TypeId>, out: &mut Vec<FieldInfo>) {
    let mut embedded = Vec::new();

    for field in ty.fields() {
        if field.embedded {
            embedded.push(field);
        } else {
            out.push(FieldInfo {
                parent: parent.to_owned(),
                field: field.clone(),
            });
        }
    }

    for field in embedded {
        if field.skip {
            continue;
        }
        let (inner_ref, inner) = field.ty.deref();
        let id = inner_ref.id();
        if !inner.is_struct() || seen.contains(&id) {
            continue;
        }
        seen.push(id);
        let name = if inner.name.is_empty() {
            parent.to_owned()
        } else {
            inner.name.clone()
        };
        collect_into(&inner, &name, seen, out);
    }
}

/// Builds the schema for one record field and applies its annotations.
///
/// Fields without annotations share the registry's schema instance. Returns
/// `Ok(None)` when the field's type has no schema.
pub fn schema_from_field(
    registry: &Registry,
    parent: &str,
    field: &Field,
) -> Result<Option<Arc<Schema>>, SchemaError> {
    let hint = format!("{}{}Struct", capitalize(parent), capitalize(&field.name));
    let shared = match registry.schema(field.ty, true, &hint)? {
        Some(s) => s,
        None => return Ok(None),
    };
    if field.tags.is_empty() {
        return Ok(Some(shared));
    }

    for (key, _) in &field.tags {
        if !ANNOTATIONS.contains(&key.as_str()) {
            warn!(field = %field.name, tag = %key, "ignoring unknown annotation");
        }
    }

    let (_, ty) = field.ty.deref();
    let mut fs = (*shared).clone();

    if fs.is_reference() {
        if let Some((tag, _)) = field.tags.iter().find(|(k, v)| {
            !v.is_empty()
                && ANNOTATIONS.contains(&k.as_str())
                && !REFERENCE_ANNOTATIONS.contains(&k.as_str())
        }) {
            return Err(SchemaError::ConstrainedReference {
                field: field.name.clone(),
                tag: tag.clone(),
            });
        }
    }

    let ann = Annotations { field, ty: &ty };

    if let Some(doc) = field.get_tag("doc") {
        fs.description = Some(doc.to_owned());
    }
    if let Some(format) = field.get_tag("format") {
        fs.format = Some(format.to_owned());
    }
    if let Some(encoding) = field.get_tag("encoding") {
        fs.content_encoding = Some(encoding.to_owned());
    }
    if let Some(text) = field.get_tag("default") {
        fs.default = Some(ann.typed("default", &ty, text)?);
    }
    if let Some(text) = field.get_tag("example") {
        fs.examples = vec![ann.typed("example", &ty, text)?];
    }

    if let Some(text) = field.get_tag("enum") {
        apply_enum(&ann, &mut fs, text)?;
    }

    fs.minimum = ann.float("minimum")?.or(fs.minimum);
    fs.exclusive_minimum = ann.float("exclusiveMinimum")?.or(fs.exclusive_minimum);
    fs.maximum = ann.float("maximum")?.or(fs.maximum);
    fs.exclusive_maximum = ann.float("exclusiveMaximum")?.or(fs.exclusive_maximum);
    fs.multiple_of = ann.float("multipleOf")?.or(fs.multiple_of);
    fs.min_length = ann.int("minLength")?.or(fs.min_length);
    fs.max_length = ann.int("maxLength")?.or(fs.max_length);
    if let Some(pattern) = field.get_tag("pattern") {
        fs.pattern = Some(pattern.to_owned());
    }
    fs.min_items = ann.int("minItems")?.or(fs.min_items);
    fs.max_items = ann.int("maxItems")?.or(fs.max_items);
    fs.min_properties = ann.int("minProperties")?.or(fs.min_properties);
    fs.max_properties = ann.int("maxProperties")?.or(fs.max_properties);
    fs.unique_items = ann.flag("uniqueItems")?.unwrap_or(fs.unique_items);
    fs.read_only = ann.flag("readOnly")?.unwrap_or(fs.read_only);
    fs.write_only = ann.flag("writeOnly")?.unwrap_or(fs.write_only);
    fs.deprecated = ann.flag("deprecated")?.unwrap_or(fs.deprecated);

    fs.precompute_messages()?;
    Ok(Some(Arc::new(fs)))
}

fn apply_enum(ann: &Annotations<'_>, fs: &mut Schema, text: &str) -> Result<(), SchemaError> {
    let on_items = fs.type_ == Some(SchemaType::Array);
    let member_type = match &ann.ty.kind {
        Kind::Slice(elem) | Kind::Array(elem, _) if on_items => elem.deref().1,
        _ => ann.ty.clone(),
    };

    let members = text
        .split(',')
        .map(|member| ann.typed("enum", &member_type, member.trim()))
        .collect::<Result<Vec<_>, _>>()?;

    if !on_items {
        fs.enum_ = members;
        return Ok(());
    }

    match &fs.items {
        Some(items) => {
            if items.is_reference() {
                return Err(SchemaError::ConstrainedReference {
                    field: ann.field.name.clone(),
                    tag: "enum".to_owned(),
                });
            }
            let mut items = (**items).clone();
            items.enum_ = members;
            items.precompute_messages()?;
            fs.items = Some(Arc::new(items));
        }
        None => {
            warn!(field = %ann.field.name, "enum on an array without an item schema is ignored")
        }
    }
    Ok(())
}

struct Annotations<'a> {
    field: &'a Field,
    ty: &'a Type,
}

impl Annotations<'_> {
    fn invalid(&self, tag: &str, value: &str, reason: impl ToString) -> SchemaError {
        SchemaError::InvalidAnnotation {
            field: self.field.name.clone(),
            tag: tag.to_owned(),
            value: value.to_owned(),
            reason: reason.to_string(),
        }
    }

    fn float(&self, tag: &str) -> Result<Option<f64>, SchemaError> {
        match self.field.get_tag(tag) {
            Some(v) => v
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|e| self.invalid(tag, v, e)),
            None => Ok(None),
        }
    }

    fn int(&self, tag: &str) -> Result<Option<usize>, SchemaError> {
        match self.field.get_tag(tag) {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|e| self.invalid(tag, v, e)),
            None => Ok(None),
        }
    }

    fn flag(&self, tag: &str) -> Result<Option<bool>, SchemaError> {
        match self.field.get_tag(tag) {
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(v) => Err(self.invalid(tag, v, "expected true or false")),
            None => Ok(None),
        }
    }

    /// Parses annotation text into a value of type `ty`.
    ///
    /// String-like types take the text literally and string arrays accept an
    /// unquoted comma-separated list; everything else is parsed as JSON and
    /// converted to the declared type.
    fn typed(&self, tag: &str, ty: &Type, text: &str) -> Result<Value, SchemaError> {
        match &ty.kind {
            Kind::String | Kind::Timestamp | Kind::Uri | Kind::Ip => {
                return Ok(Value::String(text.to_owned()))
            }
            Kind::Slice(elem) | Kind::Array(elem, _)
                if !text.starts_with('[') && is_string(*elem) =>
            {
                return Ok(Value::Array(
                    text.split(',')
                        .map(|s| Value::String(s.trim().to_owned()))
                        .collect(),
                ));
            }
            Kind::Pointer(inner) => return self.typed(tag, &inner.deref().1, text),
            _ => {}
        }

        let value: Value = serde_json::from_str(text).map_err(|e| self.invalid(tag, text, e))?;
        convert(&value, ty).ok_or_else(|| SchemaError::Conversion {
            field: self.field.name.clone(),
            value: value.to_string(),
            target: type_label(ty),
        })
    }
}

fn is_string(ty: TypeRef) -> bool {
    matches!(ty.deref().1.kind, Kind::String)
}

fn type_label(ty: &Type) -> String {
    if !ty.name.is_empty() {
        return ty.name.clone();
    }
    match &ty.kind {
        Kind::Slice(elem) => format!("Vec<{}>", type_label(&elem.describe())),
        Kind::Array(elem, len) => format!("[{}; {}]", type_label(&elem.describe()), len),
        Kind::Map(value) => format!("map of {}", type_label(&value.describe())),
        Kind::Pointer(inner) => format!("Option<{}>", type_label(&inner.describe())),
        _ => "record".to_owned(),
    }
}

/// Converts a parsed JSON value to the shape of `ty`, or `None` if it cannot
/// represent one.
fn convert(value: &Value, ty: &Type) -> Option<Value> {
    match &ty.kind {
        Kind::Bool => value.as_bool().map(Value::Bool),
        Kind::Int(width) => {
            let n = whole(value)?;
            let half = 1i128 << (width.bits() - 1);
            if n >= -half && n < half {
                Some(integer_value(n))
            } else {
                None
            }
        }
        Kind::Uint(width) => {
            let n = whole(value)?;
            if n >= 0 && n < (1i128 << width.bits()) {
                Some(integer_value(n))
            } else {
                None
            }
        }
        Kind::Float32 | Kind::Float64 => value.is_number().then(|| value.clone()),
        Kind::String | Kind::Timestamp | Kind::Uri | Kind::Ip => {
            value.is_string().then(|| value.clone())
        }
        Kind::Slice(elem) | Kind::Array(elem, _) => {
            let elem = elem.deref().1;
            value
                .as_array()?
                .iter()
                .map(|v| convert(v, &elem))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array)
        }
        Kind::Map(inner) => {
            let inner = inner.deref().1;
            value
                .as_object()?
                .iter()
                .map(|(k, v)| convert(v, &inner).map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Value::Object)
        }
        Kind::Pointer(inner) => {
            if value.is_null() {
                Some(Value::Null)
            } else {
                convert(value, &inner.deref().1)
            }
        }
        Kind::Struct(_) => value.is_object().then(|| value.clone()),
        Kind::Any => Some(value.clone()),
        Kind::Unsupported => None,
    }
}

fn whole(value: &Value) -> Option<i128> {
    if let Some(n) = value.as_i64() {
        return Some(n as i128);
    }
    if let Some(n) = value.as_u64() {
        return Some(n as i128);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f.abs() < 1.8e19 {
        Some(f as i128)
    } else {
        None
    }
}

fn integer_value(n: i128) -> Value {
    if n < 0 {
        Value::from(n as i64)
    } else {
        Value::from(n as u64)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
