//! Schema-driven encoding of host values.
//!
//! The encoder is directed by the target [`AlgebraicType`], not by the value:
//! the same `Value::U32(1)` encodes to one byte as a `u8` column and to eight
//! bytes as a `u64` column. Integers are adapted across widths when the value
//! fits, and accepted where floats are expected; everything else must match
//! the target shape exactly.

use bytes::{BufMut, Bytes, BytesMut};

use crate::bsatn::{write_bytes, write_string, OPTION_TAG_NONE, OPTION_TAG_SOME};
use crate::error::{EncodeError, EncodeResult};
use crate::value::{AlgebraicType, Column, Value, I256, U256};

/// Encodes `value` against `ty`, appending the BSATN bytes to `buf`.
pub fn encode_value(value: &Value, ty: &AlgebraicType, buf: &mut BytesMut) -> EncodeResult<()> {
    match ty {
        AlgebraicType::Bool => match value {
            Value::Bool(b) => {
                buf.put_u8(u8::from(*b));
                Ok(())
            }
            other => Err(EncodeError::mismatch(ty, other)),
        },
        AlgebraicType::I8 => {
            let v: i8 = signed(value, ty)?;
            buf.put_i8(v);
            Ok(())
        }
        AlgebraicType::U8 => {
            let v: u8 = unsigned(value, ty)?;
            buf.put_u8(v);
            Ok(())
        }
        AlgebraicType::I16 => {
            let v: i16 = signed(value, ty)?;
            buf.put_i16_le(v);
            Ok(())
        }
        AlgebraicType::U16 => {
            let v: u16 = unsigned(value, ty)?;
            buf.put_u16_le(v);
            Ok(())
        }
        AlgebraicType::I32 => {
            let v: i32 = signed(value, ty)?;
            buf.put_i32_le(v);
            Ok(())
        }
        AlgebraicType::U32 => {
            let v: u32 = unsigned(value, ty)?;
            buf.put_u32_le(v);
            Ok(())
        }
        AlgebraicType::I64 => {
            let v: i64 = signed(value, ty)?;
            buf.put_i64_le(v);
            Ok(())
        }
        AlgebraicType::U64 => {
            let v: u64 = unsigned(value, ty)?;
            buf.put_u64_le(v);
            Ok(())
        }
        AlgebraicType::I128 => {
            let v: i128 = value.as_i128().ok_or_else(|| EncodeError::mismatch(ty, value))?;
            buf.put_i128_le(v);
            Ok(())
        }
        AlgebraicType::U128 => {
            let v: u128 = value.as_u128().ok_or_else(|| EncodeError::mismatch(ty, value))?;
            buf.put_u128_le(v);
            Ok(())
        }
        AlgebraicType::I256 => {
            let wide = match value {
                Value::I256(v) => *v,
                other => match other.as_i128() {
                    Some(i) => I256::from(i),
                    None => match other.as_u128() {
                        Some(u) => I256::from(u),
                        None => return Err(EncodeError::mismatch(ty, other)),
                    },
                },
            };
            buf.put_slice(&wide.to_le_bytes());
            Ok(())
        }
        AlgebraicType::U256 => {
            let wide = match value {
                Value::U256(v) => *v,
                other => match other.as_u128() {
                    Some(u) => U256::from(u),
                    None => return Err(EncodeError::mismatch(ty, other)),
                },
            };
            buf.put_slice(&wide.to_le_bytes());
            Ok(())
        }
        AlgebraicType::F32 => {
            let v = match value {
                Value::F32(f) => *f,
                other => number_as_f64(other).ok_or_else(|| EncodeError::mismatch(ty, other))?
                    as f32,
            };
            buf.put_f32_le(v);
            Ok(())
        }
        AlgebraicType::F64 => {
            let v = match value {
                Value::F64(f) => *f,
                Value::F32(f) => f64::from(*f),
                other => number_as_f64(other).ok_or_else(|| EncodeError::mismatch(ty, other))?,
            };
            buf.put_f64_le(v);
            Ok(())
        }
        AlgebraicType::String => match value {
            Value::String(s) => {
                write_string(buf, s);
                Ok(())
            }
            other => Err(EncodeError::mismatch(ty, other)),
        },
        AlgebraicType::Bytes => match value {
            Value::Bytes(b) => {
                write_bytes(buf, b);
                Ok(())
            }
            other => Err(EncodeError::mismatch(ty, other)),
        },
        AlgebraicType::Array(inner) => match value {
            Value::Array(values) => {
                buf.put_u32_le(values.len() as u32);
                for v in values {
                    encode_value(v, inner, buf)?;
                }
                Ok(())
            }
            other => Err(EncodeError::mismatch(ty, other)),
        },
        AlgebraicType::Option(inner) => match value {
            Value::Option(None) => {
                buf.put_u8(OPTION_TAG_NONE);
                Ok(())
            }
            Value::Option(Some(v)) => {
                buf.put_u8(OPTION_TAG_SOME);
                encode_value(v, inner, buf)
            }
            // A bare value is auto-wrapped as present.
            bare => {
                buf.put_u8(OPTION_TAG_SOME);
                encode_value(bare, inner, buf)
            }
        },
        AlgebraicType::Product(columns) => match value {
            Value::Product(row) => {
                for column in columns {
                    let field = row
                        .get(&column.name)
                        .ok_or_else(|| EncodeError::MissingField(column.name.clone()))?;
                    encode_value(field, &column.ty, buf)?;
                }
                Ok(())
            }
            other => Err(EncodeError::mismatch(ty, other)),
        },
        AlgebraicType::Sum(variants) => match value {
            Value::Sum { tag, value: payload } => {
                let variant = variants
                    .get(*tag as usize)
                    .ok_or_else(|| EncodeError::mismatch(ty, value))?;
                buf.put_u8(*tag);
                encode_value(payload, &variant.ty, buf)
            }
            other => Err(EncodeError::mismatch(ty, other)),
        },
        AlgebraicType::Ref(idx) => Err(EncodeError::UnresolvedRef(*idx)),
    }
}

/// Encodes `value` against `ty` into a fresh buffer.
pub fn encode_to_bytes(value: &Value, ty: &AlgebraicType) -> EncodeResult<Bytes> {
    let mut buf = BytesMut::new();
    encode_value(value, ty, &mut buf)?;
    Ok(buf.freeze())
}

/// Encodes reducer arguments as an anonymous product over the parameter list.
///
/// Arguments are looked up in `args` by parameter name; a parameter with no
/// matching argument fails with [`EncodeError::MissingField`].
pub fn encode_reducer_args(args: &crate::Row, params: &[Column]) -> EncodeResult<Bytes> {
    let mut buf = BytesMut::new();
    for param in params {
        let value = args
            .get(&param.name)
            .ok_or_else(|| EncodeError::MissingField(param.name.clone()))?;
        encode_value(value, &param.ty, &mut buf)?;
    }
    Ok(buf.freeze())
}

fn signed<T: TryFrom<i128>>(value: &Value, ty: &AlgebraicType) -> EncodeResult<T> {
    value
        .as_i128()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| EncodeError::mismatch(ty, value))
}

fn unsigned<T: TryFrom<u128>>(value: &Value, ty: &AlgebraicType) -> EncodeResult<T> {
    value
        .as_u128()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| EncodeError::mismatch(ty, value))
}

fn number_as_f64(value: &Value) -> Option<f64> {
    if let Some(i) = value.as_i128() {
        return Some(i as f64);
    }
    value.as_u128().map(|u| u as f64)
}
