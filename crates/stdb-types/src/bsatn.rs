//! BSATN: the binary encoding for algebraic values.
//!
//! Wire rules:
//!
//! - all integers little-endian; lengths and counts are u32
//! - `bool` is one byte, exactly 0 or 1
//! - `string` and `bytes` are length-prefixed
//! - `array` is a u32 count then the concatenated elements
//! - `product` is the field encodings back-to-back, unframed
//! - `sum` is a u8 tag then the chosen variant's payload
//! - `option` is the sum `{0 = some, 1 = none}`
//!
//! Decoding is cursor-based: a [`Decoder`] advances through a [`Bytes`]
//! buffer, and whatever it has not consumed is the unread tail.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, DecodeResult};
use crate::value::{AlgebraicType, Column, Row, Value, Variant, I256, U256};

/// Option tag marking a present value.
pub const OPTION_TAG_SOME: u8 = 0;

/// Option tag marking an absent value.
pub const OPTION_TAG_NONE: u8 = 1;

// ============================================================================
// Decoder
// ============================================================================

/// Cursor over a BSATN buffer.
///
/// Each `read_*` call either consumes exactly the bytes of one value or
/// fails without consuming past the point of the error.
#[derive(Debug, Clone)]
pub struct Decoder {
    buf: Bytes,
}

impl Decoder {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the decoder, returning the unread tail.
    pub fn into_rest(self) -> Bytes {
        self.buf
    }

    fn take(&mut self, n: usize) -> DecodeResult<Bytes> {
        if self.buf.len() < n {
            return Err(DecodeError::UnexpectedEof {
                needed: n - self.buf.len(),
                remaining: self.buf.len(),
            });
        }
        Ok(self.buf.split_to(n))
    }

    fn take_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> DecodeResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> DecodeResult<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> DecodeResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> DecodeResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> DecodeResult<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_u128(&mut self) -> DecodeResult<u128> {
        Ok(u128::from_le_bytes(self.take_array()?))
    }

    pub fn read_i128(&mut self) -> DecodeResult<i128> {
        Ok(i128::from_le_bytes(self.take_array()?))
    }

    pub fn read_u256(&mut self) -> DecodeResult<U256> {
        Ok(U256::from_le_bytes(self.take_array()?))
    }

    pub fn read_i256(&mut self) -> DecodeResult<I256> {
        Ok(I256::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> DecodeResult<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> DecodeResult<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_bool(&mut self) -> DecodeResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }

    /// A u32 length or count prefix.
    pub fn read_count(&mut self) -> DecodeResult<u32> {
        self.read_u32()
    }

    pub fn read_string(&mut self) -> DecodeResult<String> {
        let len = self.read_count()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(len))
    }

    pub fn read_bytes(&mut self) -> DecodeResult<Bytes> {
        let len = self.read_count()? as usize;
        self.take(len)
    }

    /// A fixed-width byte array without a length prefix.
    pub fn read_byte_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        self.take_array()
    }

    /// An `option(u32)`, used by protocol messages.
    pub fn read_option_u32(&mut self) -> DecodeResult<Option<u32>> {
        match self.read_u8()? {
            OPTION_TAG_SOME => Ok(Some(self.read_u32()?)),
            OPTION_TAG_NONE => Ok(None),
            other => Err(DecodeError::InvalidOptionTag(other)),
        }
    }
}

/// Decodes one value of the given type, advancing the cursor past it.
pub fn decode_value(dec: &mut Decoder, ty: &AlgebraicType) -> DecodeResult<Value> {
    match ty {
        AlgebraicType::Bool => Ok(Value::Bool(dec.read_bool()?)),
        AlgebraicType::I8 => Ok(Value::I8(dec.read_i8()?)),
        AlgebraicType::U8 => Ok(Value::U8(dec.read_u8()?)),
        AlgebraicType::I16 => Ok(Value::I16(dec.read_i16()?)),
        AlgebraicType::U16 => Ok(Value::U16(dec.read_u16()?)),
        AlgebraicType::I32 => Ok(Value::I32(dec.read_i32()?)),
        AlgebraicType::U32 => Ok(Value::U32(dec.read_u32()?)),
        AlgebraicType::I64 => Ok(Value::I64(dec.read_i64()?)),
        AlgebraicType::U64 => Ok(Value::U64(dec.read_u64()?)),
        AlgebraicType::I128 => Ok(Value::I128(dec.read_i128()?)),
        AlgebraicType::U128 => Ok(Value::U128(dec.read_u128()?)),
        AlgebraicType::I256 => Ok(Value::I256(dec.read_i256()?)),
        AlgebraicType::U256 => Ok(Value::U256(dec.read_u256()?)),
        AlgebraicType::F32 => Ok(Value::F32(dec.read_f32()?)),
        AlgebraicType::F64 => Ok(Value::F64(dec.read_f64()?)),
        AlgebraicType::String => Ok(Value::String(dec.read_string()?)),
        AlgebraicType::Bytes => Ok(Value::Bytes(dec.read_bytes()?)),
        AlgebraicType::Array(inner) => {
            let count = dec.read_count()? as usize;
            let mut values = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                values.push(decode_value(dec, inner)?);
            }
            Ok(Value::Array(values))
        }
        AlgebraicType::Option(inner) => match dec.read_u8()? {
            OPTION_TAG_SOME => Ok(Value::Option(Some(Box::new(decode_value(dec, inner)?)))),
            OPTION_TAG_NONE => Ok(Value::Option(None)),
            other => Err(DecodeError::InvalidOptionTag(other)),
        },
        AlgebraicType::Product(columns) => Ok(Value::Product(decode_product(dec, columns)?)),
        AlgebraicType::Sum(variants) => decode_sum(dec, variants),
        AlgebraicType::Ref(idx) => Err(DecodeError::UnknownVariantTag {
            tag: 0,
            what: format!("unresolved ref({idx})"),
        }),
    }
}

/// Decodes a product into a row, field by field in column order.
pub fn decode_product(dec: &mut Decoder, columns: &[Column]) -> DecodeResult<Row> {
    let mut row = Row::new();
    for column in columns {
        let value = decode_value(dec, &column.ty)?;
        row.insert(column.name.clone(), value);
    }
    Ok(row)
}

fn decode_sum(dec: &mut Decoder, variants: &[Variant]) -> DecodeResult<Value> {
    let tag = dec.read_u8()?;
    let variant = variants
        .get(tag as usize)
        .ok_or_else(|| DecodeError::UnknownVariantTag {
            tag,
            what: format!("sum of {} variants", variants.len()),
        })?;
    let value = decode_value(dec, &variant.ty)?;
    Ok(Value::Sum {
        tag,
        value: Box::new(value),
    })
}

// ============================================================================
// Encoding primitives
// ============================================================================

/// Writes a u32 length prefix followed by the string's UTF-8 bytes.
pub fn write_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Writes a u32 length prefix followed by the raw bytes.
pub fn write_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Writes an `option(u32)`.
pub fn write_option_u32(buf: &mut BytesMut, value: Option<u32>) {
    match value {
        Some(v) => {
            buf.put_u8(OPTION_TAG_SOME);
            buf.put_u32_le(v);
        }
        None => buf.put_u8(OPTION_TAG_NONE),
    }
}

#[cfg(test)]
mod decoder_tests {
    use super::*;

    #[test]
    fn take_past_end_reports_shortfall() {
        let mut dec = Decoder::new(Bytes::from_static(&[1, 2, 3]));
        let err = dec.read_u64().unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnexpectedEof {
                needed: 5,
                remaining: 3
            }
        );
    }

    #[test]
    fn decoder_exposes_unread_tail() {
        let mut dec = Decoder::new(Bytes::from_static(&[7, 0, 0, 0, 0xAA, 0xBB]));
        assert_eq!(dec.read_u32().unwrap(), 7);
        assert_eq!(dec.remaining(), 2);
        assert_eq!(&dec.into_rest()[..], &[0xAA, 0xBB]);
    }

    #[test]
    fn bool_rejects_other_bytes() {
        let mut dec = Decoder::new(Bytes::from_static(&[2]));
        assert_eq!(dec.read_bool().unwrap_err(), DecodeError::InvalidBool(2));
    }
}
