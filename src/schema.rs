use crate::error::SchemaError;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// The JSON Schema `type` keyword values supported for native types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl SchemaType {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaType::Boolean => "boolean",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::String => "string",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `additionalProperties`: a flag, or a schema every value must match.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
    Allowed(bool),
    Schema(Arc<Schema>),
}

/// The constraints that carry a precomputed violation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Constraint {
    Enum,
    Minimum,
    ExclusiveMinimum,
    Maximum,
    ExclusiveMaximum,
    MultipleOf,
    MinLength,
    MaxLength,
    Pattern,
    MinItems,
    MaxItems,
    MinProperties,
    MaxProperties,
}

impl Constraint {
    fn fallback(self) -> &'static str {
        match self {
            Constraint::Enum => "expected value to be one of the allowed values",
            Constraint::Minimum => "expected number >= minimum",
            Constraint::ExclusiveMinimum => "expected number > exclusive minimum",
            Constraint::Maximum => "expected number <= maximum",
            Constraint::ExclusiveMaximum => "expected number < exclusive maximum",
            Constraint::MultipleOf => "expected number to be a multiple of multipleOf",
            Constraint::MinLength => "expected length >= minLength",
            Constraint::MaxLength => "expected length <= maxLength",
            Constraint::Pattern => "expected string to match pattern",
            Constraint::MinItems => "expected array length >= minItems",
            Constraint::MaxItems => "expected array length <= maxItems",
            Constraint::MinProperties => "expected object with at least minProperties properties",
            Constraint::MaxProperties => "expected object with at most maxProperties properties",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Messages {
    by_constraint: BTreeMap<Constraint, String>,
    required: HashMap<String, String>,
}

impl Messages {
    pub fn get(&self, constraint: Constraint) -> &str {
        self.by_constraint
            .get(&constraint)
            .map(String::as_str)
            .unwrap_or_else(|| constraint.fallback())
    }

    pub fn required(&self, name: &str) -> &str {
        self.required
            .get(name)
            .map(String::as_str)
            .unwrap_or("expected required property to be present")
    }

    pub fn len(&self) -> usize {
        self.by_constraint.len() + self.required.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Default)]
struct Compiled {
    pattern: Option<Regex>,
    required: HashSet<String>,
    messages: Messages,
    ready: bool,
}

#[inline]
fn is_false(v: &bool) -> bool {
    !v
}

/// A JSON Schema node compatible with OpenAPI 3.1.
///
/// Only the subset of JSON Schema needed to describe native structured types
/// is supported. Anything else can be carried in `extensions`, which is
/// flattened into the top level of the serialized document.
///
/// After changing any constraint field, call
/// [`precompute_messages`][Schema::precompute_messages] before handing the
/// schema to the validator.
///
/// ```
/// use typeschema::{Schema, SchemaType};
/// use serde_json::json;
///
/// let mut schema = Schema::new(SchemaType::Integer);
/// schema.minimum = Some(1.0);
/// schema.precompute_messages().unwrap();
///
/// assert_eq!(
///     json!({ "type": "integer", "minimum": 1.0 }),
///     serde_json::to_value(&schema).unwrap()
/// );
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<SchemaType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub ref_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Arc<Schema>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<AdditionalProperties>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Arc<Schema>>,

    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_: Vec<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub unique_items: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_properties: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_properties: Option<usize>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub write_only: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub deprecated: bool,

    #[serde(flatten)]
    pub extensions: IndexMap<String, Value>,

    #[serde(skip)]
    compiled: Compiled,
}

impl Schema {
    pub fn new(type_: SchemaType) -> Self {
        Schema {
            type_: Some(type_),
            ..Default::default()
        }
    }

    /// A pure reference to a schema stored elsewhere, e.g.
    /// `#/components/schemas/Pet`.
    pub fn reference(ref_: impl Into<String>) -> Self {
        Schema {
            ref_: Some(ref_.into()),
            ..Default::default()
        }
    }

    pub fn is_reference(&self) -> bool {
        self.ref_.is_some()
    }

    pub fn messages(&self) -> &Messages {
        &self.compiled.messages
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.compiled.required.contains(name)
    }

    pub(crate) fn pattern_matcher(&self) -> Option<&Regex> {
        self.compiled.pattern.as_ref()
    }

    /// Finalizes the schema: checks its invariants, compiles the pattern and
    /// rebuilds every precomputed message from the current constraints.
    ///
    /// Nested schemas owned only by this one are finalized first, as are
    /// shared ones that never were.
    pub fn precompute_messages(&mut self) -> Result<(), SchemaError> {
        self.check_invariants()?;
        self.precompute_children()?;

        let mut by_constraint = BTreeMap::new();

        if !self.enum_.is_empty() {
            let members: Vec<String> = self.enum_.iter().map(enum_member).collect();
            by_constraint.insert(
                Constraint::Enum,
                format!("expected value to be one of \"{}\"", members.join(", ")),
            );
        }

        let numeric = [
            (Constraint::Minimum, self.minimum, ">="),
            (Constraint::ExclusiveMinimum, self.exclusive_minimum, ">"),
            (Constraint::Maximum, self.maximum, "<="),
            (Constraint::ExclusiveMaximum, self.exclusive_maximum, "<"),
        ];
        for (constraint, bound, op) in numeric.iter() {
            if let Some(v) = bound {
                by_constraint.insert(*constraint, format!("expected number {} {}", op, v));
            }
        }
        if let Some(v) = self.multiple_of {
            by_constraint.insert(
                Constraint::MultipleOf,
                format!("expected number to be a multiple of {}", v),
            );
        }

        if let Some(n) = self.min_length {
            by_constraint.insert(Constraint::MinLength, format!("expected length >= {}", n));
        }
        if let Some(n) = self.max_length {
            by_constraint.insert(Constraint::MaxLength, format!("expected length <= {}", n));
        }

        self.compiled.pattern = match &self.pattern {
            Some(pattern) => {
                let re = Regex::new(pattern).map_err(|source| SchemaError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                by_constraint.insert(
                    Constraint::Pattern,
                    format!("expected string to match pattern {}", pattern),
                );
                Some(re)
            }
            None => None,
        };

        if let Some(n) = self.min_items {
            by_constraint.insert(Constraint::MinItems, format!("expected array length >= {}", n));
        }
        if let Some(n) = self.max_items {
            by_constraint.insert(Constraint::MaxItems, format!("expected array length <= {}", n));
        }
        if let Some(n) = self.min_properties {
            by_constraint.insert(
                Constraint::MinProperties,
                format!("expected object with at least {} properties", n),
            );
        }
        if let Some(n) = self.max_properties {
            by_constraint.insert(
                Constraint::MaxProperties,
                format!("expected object with at most {} properties", n),
            );
        }

        let required = self
            .required
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    format!("expected required property {} to be present", name),
                )
            })
            .collect();

        self.compiled.required = self.required.iter().cloned().collect();
        self.compiled.messages = Messages {
            by_constraint,
            required,
        };
        self.compiled.ready = true;

        Ok(())
    }

    fn precompute_children(&mut self) -> Result<(), SchemaError> {
        let additional = match &mut self.additional_properties {
            Some(AdditionalProperties::Schema(s)) => Some(s),
            _ => None,
        };
        let children = self
            .items
            .iter_mut()
            .chain(additional)
            .chain(self.properties.values_mut());

        for child in children {
            // A uniquely owned child may have been edited since it was cloned.
            if let Some(owned) = Arc::get_mut(child) {
                owned.precompute_messages()?;
            } else if !child.compiled.ready && !child.is_reference() {
                Arc::make_mut(child).precompute_messages()?;
            }
        }
        Ok(())
    }

    fn check_invariants(&self) -> Result<(), SchemaError> {
        if self.ref_.is_some() {
            if let Some(constraint) = self.first_constraint() {
                return Err(SchemaError::ImpureReference { constraint });
            }
        }

        for name in &self.required {
            if !self.properties.contains_key(name) {
                return Err(SchemaError::UndeclaredRequired { name: name.clone() });
            }
        }

        Ok(())
    }

    fn first_constraint(&self) -> Option<&'static str> {
        let present = [
            ("type", self.type_.is_some()),
            ("format", self.format.is_some()),
            ("contentEncoding", self.content_encoding.is_some()),
            ("items", self.items.is_some()),
            ("additionalProperties", self.additional_properties.is_some()),
            ("properties", !self.properties.is_empty()),
            ("enum", !self.enum_.is_empty()),
            ("minimum", self.minimum.is_some()),
            ("exclusiveMinimum", self.exclusive_minimum.is_some()),
            ("maximum", self.maximum.is_some()),
            ("exclusiveMaximum", self.exclusive_maximum.is_some()),
            ("multipleOf", self.multiple_of.is_some()),
            ("minLength", self.min_length.is_some()),
            ("maxLength", self.max_length.is_some()),
            ("pattern", self.pattern.is_some()),
            ("minItems", self.min_items.is_some()),
            ("maxItems", self.max_items.is_some()),
            ("uniqueItems", self.unique_items),
            ("required", !self.required.is_empty()),
            ("minProperties", self.min_properties.is_some()),
            ("maxProperties", self.max_properties.is_some()),
        ];

        present.iter().find(|(_, set)| *set).map(|(name, _)| *name)
    }
}

fn enum_member(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_partial() {
        // Unset fields shouldn't be serialized.
        assert_eq!(
            "{\"$ref\":\"#/components/schemas/Pet\"}",
            serde_json::to_string(&Schema::reference("#/components/schemas/Pet")).unwrap()
        );
    }

    #[test]
    fn serialize_properties_in_insertion_order() {
        let mut schema = Schema::new(SchemaType::Object);
        schema
            .properties
            .insert("zeta".to_owned(), Arc::new(Schema::new(SchemaType::String)));
        schema
            .properties
            .insert("alpha".to_owned(), Arc::new(Schema::new(SchemaType::Boolean)));
        schema.required = vec!["zeta".to_owned()];
        schema.additional_properties = Some(AdditionalProperties::Allowed(false));
        schema
            .extensions
            .insert("x-internal".to_owned(), json!(true));
        schema.precompute_messages().unwrap();

        assert_eq!(
            r#"{"type":"object","additionalProperties":false,"properties":{"zeta":{"type":"string"},"alpha":{"type":"boolean"}},"required":["zeta"],"x-internal":true}"#,
            serde_json::to_string(&schema).unwrap()
        );
    }

    #[test]
    fn parse_document() {
        let mut schema: Schema = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "tags": {
                    "type": "array",
                    "items": { "type": "string", "enum": ["a", "b"] },
                    "uniqueItems": true,
                },
                "counts": {
                    "type": "object",
                    "additionalProperties": { "type": "integer" },
                },
            },
            "required": ["tags"],
            "x-visibility": "public",
        }))
        .unwrap();
        schema.precompute_messages().unwrap();

        assert_eq!(Some(SchemaType::Object), schema.type_);
        assert!(schema.is_required("tags"));
        assert!(!schema.is_required("counts"));
        assert_eq!(Some(&json!("public")), schema.extensions.get("x-visibility"));
        assert!(schema.properties["tags"].unique_items);
        assert_eq!(
            "expected value to be one of \"a, b\"",
            schema.properties["tags"]
                .items
                .as_ref()
                .unwrap()
                .messages()
                .get(Constraint::Enum)
        );
        assert!(matches!(
            schema.properties["counts"].additional_properties,
            Some(AdditionalProperties::Schema(_))
        ));
    }

    #[test]
    fn messages() {
        let mut schema = Schema::new(SchemaType::Number);
        schema.minimum = Some(1.0);
        schema.exclusive_maximum = Some(2.5);
        schema.multiple_of = Some(0.5);
        schema.enum_ = vec![json!("one"), json!(2), json!(true)];
        schema.precompute_messages().unwrap();

        let messages = schema.messages();
        assert_eq!("expected number >= 1", messages.get(Constraint::Minimum));
        assert_eq!("expected number < 2.5", messages.get(Constraint::ExclusiveMaximum));
        assert_eq!(
            "expected number to be a multiple of 0.5",
            messages.get(Constraint::MultipleOf)
        );
        assert_eq!(
            "expected value to be one of \"one, 2, true\"",
            messages.get(Constraint::Enum)
        );
    }

    #[test]
    fn precompute_is_idempotent() {
        let mut schema = Schema::new(SchemaType::Object);
        schema
            .properties
            .insert("name".to_owned(), Arc::new(Schema::new(SchemaType::String)));
        schema.required = vec!["name".to_owned()];
        schema.min_properties = Some(1);
        schema.precompute_messages().unwrap();
        let first = schema.messages().clone();

        schema.precompute_messages().unwrap();
        assert_eq!(&first, schema.messages());
        assert_eq!(
            "expected required property name to be present",
            schema.messages().required("name")
        );
    }

    #[test]
    fn precompute_drops_stale_messages() {
        let mut schema = Schema::new(SchemaType::String);
        schema.max_length = Some(3);
        schema.precompute_messages().unwrap();
        assert_eq!(1, schema.messages().len());

        schema.max_length = None;
        schema.min_length = Some(2);
        schema.precompute_messages().unwrap();
        assert_eq!(1, schema.messages().len());
        assert_eq!("expected length >= 2", schema.messages().get(Constraint::MinLength));
    }

    #[test]
    fn invalid_pattern() {
        let mut schema = Schema::new(SchemaType::String);
        schema.pattern = Some("^[a-".to_owned());

        assert!(matches!(
            schema.precompute_messages(),
            Err(SchemaError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn undeclared_required() {
        let mut schema = Schema::new(SchemaType::Object);
        schema.required = vec!["missing".to_owned()];

        assert!(matches!(
            schema.precompute_messages(),
            Err(SchemaError::UndeclaredRequired { name }) if name == "missing"
        ));
    }

    #[test]
    fn impure_reference() {
        let mut schema = Schema::reference("#/components/schemas/Pet");
        schema.description = Some("allowed alongside a reference".to_owned());
        schema.read_only = true;
        schema.precompute_messages().unwrap();

        schema.minimum = Some(0.0);
        assert!(matches!(
            schema.precompute_messages(),
            Err(SchemaError::ImpureReference {
                constraint: "minimum"
            })
        ));
    }
}
