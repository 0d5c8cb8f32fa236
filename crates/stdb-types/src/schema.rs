//! Schema model and parsing.
//!
//! The schema endpoint serves a JSON document with three sections:
//!
//! - `typespace.types`: an ordered list of product or sum definitions,
//!   referenced positionally by the rest of the document
//! - `tables`: each names a product in the typespace by index and lists its
//!   primary-key column indices
//! - `reducers`: each carries an inline parameter product
//!
//! Parsing inlines every typespace reference, so the resulting [`Schema`]
//! holds self-contained type trees: no `Ref` survives in any type reachable
//! from a table column or reducer parameter.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::error::{SchemaError, SchemaResult};
use crate::value::{AlgebraicType, Column, Variant};

/// Bound on ref-chain length during inlining. A well-formed typespace never
/// approaches this; hitting it means a reference cycle.
const MAX_RESOLVE_DEPTH: usize = 64;

/// A table: named columns plus the indices of its primary-key columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<Column>,
    /// Primary-key column indices in definition order. May be empty.
    pub primary_key: Vec<usize>,
}

/// A reducer: a named server-side operation with a parameter product.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducerDef {
    pub name: String,
    pub params: Vec<Column>,
}

/// A parsed schema: tables and reducers with fully resolved types.
///
/// The typespace is consumed during parsing and not retained.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: HashMap<String, TableDef>,
    reducers: HashMap<String, ReducerDef>,
}

impl Schema {
    /// Parses a schema document.
    pub fn parse(doc: &Json) -> SchemaResult<Self> {
        let typespace = parse_typespace(doc)?;

        let mut tables = HashMap::new();
        for entry in require_array(doc.get("tables"), "tables")? {
            let table = parse_table(entry, &typespace)?;
            tables.insert(table.name.clone(), table);
        }

        let mut reducers = HashMap::new();
        for entry in require_array(doc.get("reducers"), "reducers")? {
            let reducer = parse_reducer(entry, &typespace)?;
            reducers.insert(reducer.name.clone(), reducer);
        }

        Ok(Self { tables, reducers })
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn reducer(&self, name: &str) -> Option<&ReducerDef> {
        self.reducers.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    pub fn reducers(&self) -> impl Iterator<Item = &ReducerDef> {
        self.reducers.values()
    }

    /// The columns of `table`, in definition order.
    pub fn columns_for(&self, table: &str) -> SchemaResult<&[Column]> {
        self.tables
            .get(table)
            .map(|t| t.columns.as_slice())
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))
    }

    /// The primary-key column indices of `table`.
    pub fn primary_key_for(&self, table: &str) -> SchemaResult<&[usize]> {
        self.tables
            .get(table)
            .map(|t| t.primary_key.as_slice())
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))
    }
}

// ============================================================================
// Typespace
// ============================================================================

/// A typespace entry, kept raw so table parsing can tell a genuinely
/// unnamed element apart from a synthesized name.
enum TypeDef {
    Product(Vec<(Option<String>, AlgebraicType)>),
    Sum(Vec<(Option<String>, AlgebraicType)>),
}

fn parse_typespace(doc: &Json) -> SchemaResult<Vec<TypeDef>> {
    let types = doc
        .pointer("/typespace/types")
        .ok_or(SchemaError::MissingKey("typespace.types"))?;
    require_array(Some(types), "typespace.types")?
        .iter()
        .map(parse_type_def)
        .collect()
}

fn parse_type_def(node: &Json) -> SchemaResult<TypeDef> {
    let obj = node.as_object().ok_or_else(|| shape("type definition object", node))?;
    if let Some(product) = obj.get("Product") {
        Ok(TypeDef::Product(parse_elements(product, "elements")?))
    } else if let Some(sum) = obj.get("Sum") {
        Ok(TypeDef::Sum(parse_elements(sum, "variants")?))
    } else {
        Err(shape("Product or Sum definition", node))
    }
}

/// Parses the element list of a product (`elements`) or sum (`variants`).
fn parse_elements(node: &Json, key: &'static str) -> SchemaResult<Vec<(Option<String>, AlgebraicType)>> {
    let list = require_array(node.get(key), key)?;
    list.iter()
        .map(|element| {
            let name = parse_element_name(element.get("name"));
            let ty_node = element
                .get("algebraic_type")
                .ok_or(SchemaError::MissingKey("algebraic_type"))?;
            Ok((name, parse_type(ty_node)?))
        })
        .collect()
}

/// Element names arrive either as a bare string or as an option-shaped
/// object (`{"some": "id"}` / `{"none": []}`).
fn parse_element_name(node: Option<&Json>) -> Option<String> {
    match node? {
        Json::String(s) => Some(s.clone()),
        Json::Object(obj) => obj.get("some").and_then(Json::as_str).map(str::to_string),
        _ => None,
    }
}

/// Parses a type node: a bare tag string, or a single-key object whose key
/// is the tag and whose value is the payload.
fn parse_type(node: &Json) -> SchemaResult<AlgebraicType> {
    match node {
        Json::String(tag) => primitive(tag).ok_or_else(|| SchemaError::UnknownTypeTag(tag.clone())),
        Json::Object(obj) => {
            let (tag, payload) = obj
                .iter()
                .next()
                .ok_or_else(|| shape("non-empty type object", node))?;
            if let Some(prim) = primitive(tag) {
                return Ok(prim);
            }
            match tag.as_str() {
                "Array" => Ok(AlgebraicType::Array(Box::new(parse_type(payload)?))),
                "Ref" => {
                    let idx = payload
                        .as_u64()
                        .ok_or_else(|| shape("ref index", payload))?;
                    Ok(AlgebraicType::Ref(idx as usize))
                }
                "Product" => {
                    let elements = parse_elements(payload, "elements")?;
                    Ok(product_type(elements))
                }
                "Sum" => {
                    let variants = parse_elements(payload, "variants")?;
                    Ok(sum_type(variants))
                }
                other => Err(SchemaError::UnknownTypeTag(other.to_string())),
            }
        }
        _ => Err(shape("type tag", node)),
    }
}

fn primitive(tag: &str) -> Option<AlgebraicType> {
    Some(match tag {
        "Bool" => AlgebraicType::Bool,
        "I8" => AlgebraicType::I8,
        "U8" => AlgebraicType::U8,
        "I16" => AlgebraicType::I16,
        "U16" => AlgebraicType::U16,
        "I32" => AlgebraicType::I32,
        "U32" => AlgebraicType::U32,
        "I64" => AlgebraicType::I64,
        "U64" => AlgebraicType::U64,
        "I128" => AlgebraicType::I128,
        "U128" => AlgebraicType::U128,
        "I256" => AlgebraicType::I256,
        "U256" => AlgebraicType::U256,
        "F32" => AlgebraicType::F32,
        "F64" => AlgebraicType::F64,
        "String" => AlgebraicType::String,
        "Bytes" => AlgebraicType::Bytes,
        _ => return None,
    })
}

/// Nested anonymous products get positional field names.
fn product_type(elements: Vec<(Option<String>, AlgebraicType)>) -> AlgebraicType {
    let columns = elements
        .into_iter()
        .enumerate()
        .map(|(i, (name, ty))| Column::new(name.unwrap_or_else(|| format!("field_{i}")), ty))
        .collect();
    AlgebraicType::Product(columns)
}

/// Builds a sum type, recognizing the two-variant `some`/`none` shape as an
/// option.
fn sum_type(variants: Vec<(Option<String>, AlgebraicType)>) -> AlgebraicType {
    if variants.len() == 2
        && variants[0].0.as_deref() == Some("some")
        && variants[1].0.as_deref() == Some("none")
    {
        let inner = variants.first().map(|(_, ty)| ty.clone());
        if let Some(inner) = inner {
            return AlgebraicType::Option(Box::new(inner));
        }
    }
    let variants = variants
        .into_iter()
        .enumerate()
        .map(|(i, (name, ty))| Variant::new(name.unwrap_or_else(|| format!("variant_{i}")), ty))
        .collect();
    AlgebraicType::Sum(variants)
}

// ============================================================================
// Ref resolution
// ============================================================================

/// Replaces every `Ref` in `ty` by the referenced definition, recursively,
/// until none remain. Chains longer than [`MAX_RESOLVE_DEPTH`] indicate a
/// cycle and fail with `UnresolvedRef`.
fn resolve(ty: AlgebraicType, typespace: &[TypeDef], depth: usize) -> SchemaResult<AlgebraicType> {
    match ty {
        AlgebraicType::Ref(idx) => {
            if depth >= MAX_RESOLVE_DEPTH {
                return Err(SchemaError::UnresolvedRef(idx));
            }
            let def = typespace.get(idx).ok_or(SchemaError::RefOutOfRange {
                index: idx,
                len: typespace.len(),
            })?;
            let inlined = match def {
                TypeDef::Product(elements) => product_type(elements.clone()),
                TypeDef::Sum(variants) => sum_type(variants.clone()),
            };
            resolve(inlined, typespace, depth + 1)
        }
        AlgebraicType::Array(inner) => Ok(AlgebraicType::Array(Box::new(resolve(
            *inner, typespace, depth,
        )?))),
        AlgebraicType::Option(inner) => Ok(AlgebraicType::Option(Box::new(resolve(
            *inner, typespace, depth,
        )?))),
        AlgebraicType::Product(columns) => {
            let columns = columns
                .into_iter()
                .map(|c| Ok(Column::new(c.name, resolve(c.ty, typespace, depth)?)))
                .collect::<SchemaResult<Vec<_>>>()?;
            Ok(AlgebraicType::Product(columns))
        }
        AlgebraicType::Sum(variants) => {
            let variants = variants
                .into_iter()
                .map(|v| Ok(Variant::new(v.name, resolve(v.ty, typespace, depth)?)))
                .collect::<SchemaResult<Vec<_>>>()?;
            Ok(AlgebraicType::Sum(variants))
        }
        other => Ok(other),
    }
}

// ============================================================================
// Tables and reducers
// ============================================================================

fn parse_table(node: &Json, typespace: &[TypeDef]) -> SchemaResult<TableDef> {
    let name = require_str(node.get("name"), "table name")?;

    let type_ref = node
        .get("product_type_ref")
        .and_then(Json::as_u64)
        .ok_or(SchemaError::MissingKey("product_type_ref"))? as usize;
    let def = typespace.get(type_ref).ok_or(SchemaError::RefOutOfRange {
        index: type_ref,
        len: typespace.len(),
    })?;
    let TypeDef::Product(elements) = def else {
        return Err(SchemaError::InvalidShape {
            what: "product type for table",
            found: format!("sum at typespace index {type_ref}"),
        });
    };

    let columns = named_columns(elements, &name, typespace)?;

    let primary_key = match node.get("primary_key") {
        None | Some(Json::Null) => Vec::new(),
        Some(pk) => require_array(Some(pk), "primary_key")?
            .iter()
            .map(|v| {
                v.as_u64()
                    .map(|i| i as usize)
                    .ok_or_else(|| shape("primary-key column index", v))
            })
            .collect::<SchemaResult<Vec<_>>>()?,
    };

    Ok(TableDef {
        name,
        columns,
        primary_key,
    })
}

fn parse_reducer(node: &Json, typespace: &[TypeDef]) -> SchemaResult<ReducerDef> {
    let name = require_str(node.get("name"), "reducer name")?;
    let params_node = node.get("params").ok_or(SchemaError::MissingKey("params"))?;
    let elements = parse_elements(params_node, "elements")?;
    let params = named_columns(&elements, &name, typespace)?;
    Ok(ReducerDef { name, params })
}

/// Converts raw elements into columns, requiring explicit names (table rows
/// and reducer parameters are addressed by name) and resolving every ref.
fn named_columns(
    elements: &[(Option<String>, AlgebraicType)],
    context: &str,
    typespace: &[TypeDef],
) -> SchemaResult<Vec<Column>> {
    elements
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            let name = name.clone().ok_or_else(|| SchemaError::UnnamedColumn {
                context: context.to_string(),
                index: i,
            })?;
            let ty = resolve(ty.clone(), typespace, 0)?;
            debug_assert!(!ty.contains_ref(), "resolution left a ref behind");
            Ok(Column::new(name, ty))
        })
        .collect()
}

// ============================================================================
// JSON helpers
// ============================================================================

fn require_array<'a>(node: Option<&'a Json>, what: &'static str) -> SchemaResult<&'a Vec<Json>> {
    node.ok_or(SchemaError::MissingKey(what))?
        .as_array()
        .ok_or_else(|| SchemaError::InvalidShape {
            what,
            found: json_kind(node.unwrap_or(&Json::Null)).to_string(),
        })
}

fn require_str(node: Option<&Json>, what: &'static str) -> SchemaResult<String> {
    node.and_then(Json::as_str)
        .map(str::to_string)
        .ok_or(SchemaError::MissingKey(what))
}

fn shape(what: &'static str, found: &Json) -> SchemaError {
    SchemaError::InvalidShape {
        what,
        found: json_kind(found).to_string(),
    }
}

fn json_kind(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
