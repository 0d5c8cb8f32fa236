//! Error types for decoding, encoding, and schema parsing.

use thiserror::Error;

/// Result type for wire decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors that can occur while decoding BSATN bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended before the value was complete.
    #[error("unexpected end of input: need {needed} more bytes, have {remaining}")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A bool byte was neither 0 nor 1.
    #[error("invalid bool byte: {0:#04x}")]
    InvalidBool(u8),

    /// A string's bytes were not valid UTF-8.
    #[error("invalid utf-8 in string of {0} bytes")]
    InvalidUtf8(usize),

    /// An option tag was neither 0 (some) nor 1 (none).
    #[error("invalid option tag: {0}")]
    InvalidOptionTag(u8),

    /// A sum tag named no variant of the sum being decoded.
    #[error("unknown variant tag {tag} for {what}")]
    UnknownVariantTag { tag: u8, what: String },
}

/// Result type for schema-driven encoding.
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Errors that can occur while encoding a host value against a type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The value's shape does not match the target type.
    #[error("type mismatch: cannot encode {found} as {expected}")]
    TypeMismatch { expected: String, found: String },

    /// A product field was absent from the supplied row.
    #[error("missing field: {0}")]
    MissingField(String),

    /// The target type still contains a typespace reference.
    #[error("unresolved type reference: {0}")]
    UnresolvedRef(usize),
}

impl EncodeError {
    pub(crate) fn mismatch(expected: impl ToString, found: &crate::Value) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            found: found.kind().to_string(),
        }
    }
}

/// Result type for schema parsing and lookups.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while parsing a schema document or querying it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The named table is not part of the schema.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A typespace reference could not be inlined (depth bound exceeded).
    #[error("unresolved typespace reference: {0}")]
    UnresolvedRef(usize),

    /// A typespace reference pointed past the end of the typespace.
    #[error("type reference {index} out of range (typespace has {len} types)")]
    RefOutOfRange { index: usize, len: usize },

    /// A required key was absent from the document.
    #[error("schema document missing key: {0}")]
    MissingKey(&'static str),

    /// A document node had the wrong JSON shape.
    #[error("malformed schema: expected {what}, found {found}")]
    InvalidShape { what: &'static str, found: String },

    /// A type node used a tag that names no algebraic type.
    #[error("unknown type tag: {0}")]
    UnknownTypeTag(String),

    /// A table column or reducer parameter had no name.
    #[error("unnamed column {index} in {context}")]
    UnnamedColumn { context: String, index: usize },
}
