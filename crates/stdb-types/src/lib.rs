//! # stdb-types: Algebraic values, BSATN encoding, and the schema model
//!
//! This crate is the type layer of the client: it defines the algebraic
//! type tree ([`AlgebraicType`]), host values ([`Value`], [`Row`]), the
//! BSATN binary codec ([`bsatn`]), the schema-driven value encoder
//! ([`encode_value`], [`encode_reducer_args`]), and schema parsing
//! ([`Schema`]).
//!
//! ## Encoding
//!
//! BSATN is little-endian and length-prefixed:
//!
//! ```text
//! string  ┌─────────┬───────────────┐     sum  ┌─────┬──────────────┐
//!         │ len u32 │ utf-8 bytes   │          │ tag │   payload    │
//!         └─────────┴───────────────┘          └─────┴──────────────┘
//! ```
//!
//! Products are unframed field concatenations; options are the sum
//! `{0 = some, 1 = none}`.
//!
//! ## Schema resolution
//!
//! The schema document's typespace is an index-based graph. Parsing clones
//! referenced definitions into each table's columns until no reference
//! remains, so decode paths never consult the typespace.

pub mod bsatn;
mod encode;
mod error;
mod schema;
mod value;

pub use encode::{encode_reducer_args, encode_to_bytes, encode_value};
pub use error::{
    DecodeError, DecodeResult, EncodeError, EncodeResult, SchemaError, SchemaResult,
};
pub use schema::{ReducerDef, Schema, TableDef};
pub use value::{AlgebraicType, Column, Row, Value, Variant, I256, INT256_LENGTH, U256};

#[cfg(test)]
mod tests;
