use thiserror::Error;

/// A textual enum value did not match any known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
