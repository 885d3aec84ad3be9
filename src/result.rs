use crate::path::PathBuffer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// One failed constraint for one value at one location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} ({location}: {value})")]
pub struct ErrorDetail {
    pub location: String,
    pub message: String,
    pub value: Value,
}

/// An ordered, reusable list of validation violations.
#[derive(Clone, Debug, Default)]
pub struct ValidateResult {
    errors: Vec<ErrorDetail>,
}

impl ValidateResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: &PathBuffer, value: &Value, message: &str) {
        self.errors.push(ErrorDetail {
            location: path.as_str().to_owned(),
            message: message.to_owned(),
            value: value.clone(),
        });
    }

    pub fn errors(&self) -> &[ErrorDetail] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn reset(&mut self) {
        self.errors.clear();
    }

    /// Moves the errors out, leaving the result empty.
    pub fn take(&mut self) -> Vec<ErrorDetail> {
        std::mem::take(&mut self.errors)
    }
}

/// A value that did not conform to its schema, with every violation found.
#[derive(Clone, Debug, PartialEq)]
pub struct Rejection {
    pub errors: Vec<ErrorDetail>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed with {} error(s)", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for Rejection {}
