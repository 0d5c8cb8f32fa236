//! Row lists: batches of row bytes carried by snapshots and deltas.
//!
//! A row list is a blob plus a size hint saying how to split it into
//! records: either every record is `stride` bytes (`FixedSize`), or each
//! record's starting byte is listed explicitly (`RowOffsets`, last record
//! running to the end of the blob).
//!
//! Splitting is the only place a row list can fail hard: an offset past the
//! end of the blob (or a decreasing offset) poisons the whole list. Field
//! decoding never does: a record whose decode fails is still produced,
//! with [`Value::DecodeError`] sentinels in the failed positions.

use bytes::Bytes;
use tracing::{debug, trace};

use stdb_types::bsatn::{decode_value, Decoder};
use stdb_types::{Column, Row, Value};

use crate::error::{WireError, WireResult};

const SIZE_HINT_TAG_FIXED: u8 = 0;
const SIZE_HINT_TAG_OFFSETS: u8 = 1;

/// How a row-list blob splits into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSizeHint {
    /// Every record is exactly this many bytes. A stride of zero means the
    /// list is empty regardless of the blob's length.
    FixedSize(u16),
    /// Starting byte of each record; the last runs to the end of the blob.
    RowOffsets(Vec<u64>),
}

/// A batch of encoded rows.
#[derive(Debug, Clone, PartialEq)]
pub struct BsatnRowList {
    pub size_hint: RowSizeHint,
    pub rows_data: Bytes,
}

impl BsatnRowList {
    /// An empty row list.
    pub fn empty() -> Self {
        Self {
            size_hint: RowSizeHint::FixedSize(0),
            rows_data: Bytes::new(),
        }
    }

    /// Decodes a row list from its wire form: a size-hint sum followed by
    /// the length-prefixed row data.
    pub fn decode(dec: &mut Decoder) -> WireResult<Self> {
        let size_hint = match dec.read_u8()? {
            SIZE_HINT_TAG_FIXED => RowSizeHint::FixedSize(dec.read_u16()?),
            SIZE_HINT_TAG_OFFSETS => {
                let count = dec.read_count()? as usize;
                let mut offsets = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    offsets.push(dec.read_u64()?);
                }
                RowSizeHint::RowOffsets(offsets)
            }
            tag => {
                return Err(stdb_types::DecodeError::UnknownVariantTag {
                    tag,
                    what: "row size hint".to_string(),
                }
                .into())
            }
        };
        let rows_data = dec.read_bytes()?;
        Ok(Self {
            size_hint,
            rows_data,
        })
    }

    /// The number of records in the list.
    pub fn len(&self) -> usize {
        match &self.size_hint {
            RowSizeHint::FixedSize(0) => 0,
            RowSizeHint::FixedSize(stride) => self.rows_data.len() / *stride as usize,
            RowSizeHint::RowOffsets(offsets) => offsets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits the blob into one `Bytes` slice per record.
    ///
    /// This is the hard-error boundary: a bad offset fails the whole list.
    pub fn records(&self) -> WireResult<Vec<Bytes>> {
        let data = &self.rows_data;
        match &self.size_hint {
            RowSizeHint::FixedSize(0) => Ok(Vec::new()),
            RowSizeHint::FixedSize(stride) => {
                let stride = *stride as usize;
                let count = data.len() / stride;
                if data.len() % stride != 0 {
                    trace!(
                        remainder = data.len() % stride,
                        stride,
                        "row data not a stride multiple, ignoring trailing bytes"
                    );
                }
                Ok((0..count)
                    .map(|i| data.slice(i * stride..(i + 1) * stride))
                    .collect())
            }
            RowSizeHint::RowOffsets(offsets) => {
                let len = data.len();
                let mut records = Vec::with_capacity(offsets.len());
                for (i, &offset) in offsets.iter().enumerate() {
                    if offset as usize > len {
                        return Err(WireError::RowOffsetOutOfRange { offset, len });
                    }
                    if i > 0 && offset < offsets[i - 1] {
                        return Err(WireError::RowOffsetsNotMonotonic { index: i });
                    }
                    let start = offset as usize;
                    let end = offsets
                        .get(i + 1)
                        .map(|&next| (next as usize).min(len))
                        .unwrap_or(len);
                    // A decreasing *next* offset is caught on the next
                    // iteration; clamp keeps this slice in bounds meanwhile.
                    records.push(data.slice(start..end.max(start)));
                }
                Ok(records)
            }
        }
    }

    /// Decodes every record against `columns`.
    ///
    /// Structural failures (bad offsets) abort the list; field-level decode
    /// failures are embedded as sentinels in the affected row.
    pub fn decode_rows(&self, columns: &[Column]) -> WireResult<Vec<Row>> {
        Ok(self
            .records()?
            .into_iter()
            .map(|record| decode_record(record, columns))
            .collect())
    }
}

/// Decodes one record against a column list.
///
/// On the first failing field, that field and every remaining field are
/// filled with [`Value::DecodeError`]; the row itself is always produced.
pub fn decode_record(record: Bytes, columns: &[Column]) -> Row {
    let mut dec = Decoder::new(record);
    let mut row = Row::new();
    let mut failure: Option<String> = None;
    for column in columns {
        if let Some(reason) = &failure {
            row.insert(column.name.clone(), Value::DecodeError(reason.clone()));
            continue;
        }
        match decode_value(&mut dec, &column.ty) {
            Ok(value) => row.insert(column.name.clone(), value),
            Err(err) => {
                let reason = err.to_string();
                debug!(column = %column.name, %reason, "row field decode failed");
                row.insert(column.name.clone(), Value::DecodeError(reason.clone()));
                failure = Some(reason);
            }
        }
    }
    row
}
