use thiserror::Error;

/// A defect in a declared data model, found while building a [`Schema`].
///
/// These are construction-time faults: they are returned from the
/// [`Registry`] at startup and should stop the service from running with a
/// broken schema. They are never produced by validation.
///
/// [`Schema`]: crate::Schema
/// [`Registry`]: crate::Registry
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid {tag} annotation for field '{field}': {value} ({reason})")]
    InvalidAnnotation {
        field: String,
        tag: String,
        value: String,
        reason: String,
    },

    #[error("unable to convert {value} to {target} for field '{field}'")]
    Conversion {
        field: String,
        value: String,
        target: String,
    },

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("required property {name} is not a declared property")]
    UndeclaredRequired { name: String },

    #[error("reference schema carries constraint {constraint}")]
    ImpureReference { constraint: &'static str },

    #[error("{tag} annotation on field '{field}' cannot apply to a referenced schema")]
    ConstrainedReference { field: String, tag: String },

    #[error("schema {name} is being built and cannot be inlined into itself")]
    Recursive { name: String },
}
