//! Static descriptions of native types.
//!
//! Schemas are synthesized from a graph of [`Type`] descriptors rather than
//! by runtime reflection. Each participating Rust type implements
//! [`Describe`]; nested types are linked through [`TypeRef`] handles, which
//! are resolved lazily so that recursive types can describe themselves.
//!
//! ```
//! use typeschema::{Describe, Field, Type};
//!
//! struct Pet {
//!     name: String,
//!     tags: Vec<String>,
//! }
//!
//! impl Describe for Pet {
//!     fn describe() -> Type {
//!         Type::record("Pet")
//!             .field(Field::new::<String>("name").tag("minLength", "1"))
//!             .field(Field::new::<Vec<String>>("tags").optional())
//!     }
//! }
//! ```

use serde_json::Value;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Implemented by every type that can be turned into a schema.
pub trait Describe: 'static {
    fn describe() -> Type;
}

/// A copyable handle to a described type. Its identity is the Rust
/// [`TypeId`] of the described type.
#[derive(Clone, Copy)]
pub struct TypeRef {
    id: fn() -> TypeId,
    describe: fn() -> Type,
}

impl TypeRef {
    pub fn of<T: Describe>() -> Self {
        TypeRef {
            id: TypeId::of::<T>,
            describe: T::describe,
        }
    }

    pub fn id(&self) -> TypeId {
        (self.id)()
    }

    pub fn describe(&self) -> Type {
        (self.describe)()
    }

    /// Follows pointer-like types (`Option`, `Box`, `Arc`) to the type they
    /// point at.
    pub fn deref(self) -> (TypeRef, Type) {
        let mut current = self;
        let mut ty = current.describe();
        while let Kind::Pointer(inner) = ty.kind {
            current = inner;
            ty = current.describe();
        }
        (current, ty)
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TypeRef {}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeRef").field(&self.describe().name).finish()
    }
}

/// Bit width of an integer type. `Native` follows the platform pointer
/// width, like `isize` and `usize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
    Native,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::W8 => 8,
            Width::W16 => 16,
            Width::W32 => 32,
            Width::W64 => 64,
            Width::Native => usize::BITS,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Kind {
    Bool,
    Int(Width),
    Uint(Width),
    Float32,
    Float64,
    String,
    Array(TypeRef, usize),
    Slice(TypeRef),
    Map(TypeRef),
    Struct(Vec<Field>),
    Pointer(TypeRef),
    Timestamp,
    Uri,
    Ip,
    Any,
    Unsupported,
}

#[derive(Clone, Debug)]
pub struct Type {
    pub name: String,
    pub kind: Kind,
}

impl Type {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        Type {
            name: name.into(),
            kind,
        }
    }

    /// An unnamed type; records without a name are named from the hint
    /// passed to the registry.
    pub fn anonymous(kind: Kind) -> Self {
        Type::new("", kind)
    }

    pub fn record(name: impl Into<String>) -> Self {
        Type::new(name, Kind::Struct(Vec::new()))
    }

    /// Appends a field to a record. Has no effect on other kinds.
    pub fn field(mut self, field: Field) -> Self {
        if let Kind::Struct(fields) = &mut self.kind {
            fields.push(field);
        }
        self
    }

    /// Appends an embedded record whose fields are flattened into this one.
    pub fn embed<T: Describe>(self) -> Self {
        self.field(Field::embed::<T>())
    }

    pub fn fields(&self) -> &[Field] {
        match &self.kind {
            Kind::Struct(fields) => fields,
            _ => &[],
        }
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, Kind::Struct(_))
    }
}

/// A record field: its serialized name, its type and its declarative
/// annotations.
#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub ty: TypeRef,
    pub optional: bool,
    pub skip: bool,
    pub embedded: bool,
    pub tags: Vec<(String, String)>,
}

impl Field {
    pub fn new<T: Describe>(name: impl Into<String>) -> Self {
        Field::of(name, TypeRef::of::<T>())
    }

    pub fn of(name: impl Into<String>, ty: TypeRef) -> Self {
        Field {
            name: name.into(),
            ty,
            optional: false,
            skip: false,
            embedded: false,
            tags: Vec::new(),
        }
    }

    pub fn embed<T: Describe>() -> Self {
        let mut field = Field::of("", TypeRef::of::<T>());
        field.embedded = true;
        field
    }

    /// Not required to be present.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Excluded from the schema entirely.
    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn doc(self, text: impl Into<String>) -> Self {
        self.tag("doc", text)
    }

    /// The last value given for an annotation, if any. Empty values count as
    /// absent.
    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .rev()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }
}

macro_rules! describe_as {
    ($($t:ty => $name:expr, $kind:expr;)*) => {
        $(
            impl Describe for $t {
                fn describe() -> Type {
                    Type::new($name, $kind)
                }
            }
        )*
    };
}

describe_as! {
    bool => "bool", Kind::Bool;
    i8 => "i8", Kind::Int(Width::W8);
    i16 => "i16", Kind::Int(Width::W16);
    i32 => "i32", Kind::Int(Width::W32);
    i64 => "i64", Kind::Int(Width::W64);
    isize => "isize", Kind::Int(Width::Native);
    u8 => "u8", Kind::Uint(Width::W8);
    u16 => "u16", Kind::Uint(Width::W16);
    u32 => "u32", Kind::Uint(Width::W32);
    u64 => "u64", Kind::Uint(Width::W64);
    usize => "usize", Kind::Uint(Width::Native);
    f32 => "f32", Kind::Float32;
    f64 => "f64", Kind::Float64;
    String => "String", Kind::String;
    url::Url => "Url", Kind::Uri;
    std::net::Ipv4Addr => "Ipv4Addr", Kind::Ip;
    std::net::IpAddr => "IpAddr", Kind::Ip;
    Value => "Value", Kind::Any;
}

impl<Tz: chrono::TimeZone + 'static> Describe for chrono::DateTime<Tz> {
    fn describe() -> Type {
        Type::new("DateTime", Kind::Timestamp)
    }
}

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> Type {
        Type::anonymous(Kind::Slice(TypeRef::of::<T>()))
    }
}

impl<T: Describe, const N: usize> Describe for [T; N] {
    fn describe() -> Type {
        Type::anonymous(Kind::Array(TypeRef::of::<T>(), N))
    }
}

impl<V: Describe> Describe for HashMap<String, V> {
    fn describe() -> Type {
        Type::anonymous(Kind::Map(TypeRef::of::<V>()))
    }
}

impl<V: Describe> Describe for BTreeMap<String, V> {
    fn describe() -> Type {
        Type::anonymous(Kind::Map(TypeRef::of::<V>()))
    }
}

impl<T: Describe> Describe for Option<T> {
    fn describe() -> Type {
        Type::anonymous(Kind::Pointer(TypeRef::of::<T>()))
    }
}

impl<T: Describe> Describe for Box<T> {
    fn describe() -> Type {
        Type::anonymous(Kind::Pointer(TypeRef::of::<T>()))
    }
}

impl<T: Describe> Describe for Arc<T> {
    fn describe() -> Type {
        Type::anonymous(Kind::Pointer(TypeRef::of::<T>()))
    }
}

// Channels carry no data of their own and have no schema.
impl<T: 'static> Describe for std::sync::mpsc::Sender<T> {
    fn describe() -> Type {
        Type::new("Sender", Kind::Unsupported)
    }
}

impl<T: 'static> Describe for std::sync::mpsc::Receiver<T> {
    fn describe() -> Type {
        Type::new("Receiver", Kind::Unsupported)
    }
}
