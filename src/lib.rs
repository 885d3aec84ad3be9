//! Synthesizes JSON Schemas from static descriptions of Rust types and
//! validates decoded JSON values against them.
//!
//! Schemas are built once, at startup, through a [`Registry`]. Malformed
//! annotations surface there as a [`SchemaError`]. Validation then walks
//! the cached schemas per request and reports every violation it finds.

mod error;
pub mod format;
mod path;
mod pool;
mod registry;
mod result;
mod schema;
mod synth;
mod types;
mod validate;

pub use error::*;
pub use path::*;
pub use pool::*;
pub use registry::*;
pub use result::*;
pub use schema::*;
pub use synth::{schema_from_field, schema_from_type};
pub use types::*;
pub use validate::*;
