//! The one-byte compression envelope around server frames.
//!
//! Every binary frame starts with a compression tag; the rest of the frame
//! is the (possibly compressed) message payload:
//!
//! ```text
//! ┌─────────┬──────────────────────────────┐
//! │ tag (1) │   payload (var)              │
//! └─────────┴──────────────────────────────┘
//! ```
//!
//! Tag 0x00 is uncompressed, 0x02 is gzip. Tag 0x01 (brotli) is recognized
//! but reported as unsupported; the frame is dropped and the connection
//! survives.

use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{WireError, WireResult};

/// Envelope tag: no compression.
pub const COMPRESSION_NONE: u8 = 0x00;

/// Envelope tag: brotli.
pub const COMPRESSION_BROTLI: u8 = 0x01;

/// Envelope tag: gzip.
pub const COMPRESSION_GZIP: u8 = 0x02;

/// The client's compression preference, negotiated via a query parameter at
/// connect time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Brotli,
}

impl Compression {
    /// The value sent in the `compression` query parameter.
    pub fn query_value(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Brotli => "brotli",
        }
    }
}

/// Strips the envelope from a frame, inflating the payload if needed.
pub fn strip_envelope(frame: &[u8]) -> WireResult<Bytes> {
    let (&tag, payload) = frame.split_first().ok_or(WireError::EmptyFrame)?;
    match tag {
        COMPRESSION_NONE => Ok(Bytes::copy_from_slice(payload)),
        COMPRESSION_GZIP => {
            let mut inflated = Vec::new();
            GzDecoder::new(payload)
                .read_to_end(&mut inflated)
                .map_err(|e| WireError::Decompress(e.to_string()))?;
            Ok(Bytes::from(inflated))
        }
        COMPRESSION_BROTLI => Err(WireError::UnsupportedCompression("brotli")),
        other => Err(WireError::UnknownCompression(other)),
    }
}

#[cfg(test)]
mod envelope_tests {
    use super::*;

    #[test]
    fn empty_frame_is_rejected() {
        assert_eq!(strip_envelope(&[]).unwrap_err(), WireError::EmptyFrame);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(
            strip_envelope(&[0x07, 1, 2]).unwrap_err(),
            WireError::UnknownCompression(0x07)
        );
    }

    #[test]
    fn brotli_is_reported_unsupported() {
        assert_eq!(
            strip_envelope(&[COMPRESSION_BROTLI, 1, 2]).unwrap_err(),
            WireError::UnsupportedCompression("brotli")
        );
    }

    #[test]
    fn corrupt_gzip_is_a_decompress_error() {
        let err = strip_envelope(&[COMPRESSION_GZIP, 0xde, 0xad]).unwrap_err();
        assert!(matches!(err, WireError::Decompress(_)));
    }

    #[test]
    fn query_values() {
        assert_eq!(Compression::None.query_value(), "none");
        assert_eq!(Compression::Gzip.query_value(), "gzip");
        assert_eq!(Compression::Brotli.query_value(), "brotli");
    }
}
