//! Value transcoding between typed Rust values and stored bytes.
//!
//! Format flags follow the common-flags layout: the format lives in the top
//! byte, and a legacy value of `0` is read as JSON.

use serde::de::value::{Error as ValueError, SeqDeserializer, StrDeserializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub const FORMAT_MASK: u32 = 0xFF00_0000;
pub const FORMAT_JSON: u32 = 0x0200_0000;
pub const FORMAT_BINARY: u32 = 0x0300_0000;
pub const FORMAT_STRING: u32 = 0x0400_0000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscodeError {
    #[error("invalid JSON payload: {0}")]
    Json(String),

    #[error("payload does not match requested type: {0}")]
    Format(String),

    #[error("unsupported format flags {0:#010x}")]
    UnsupportedFlags(u32),
}

/// Converts between stored bytes (plus flags) and typed values.
pub trait Transcoder: Send + Sync {
    fn decode<V: DeserializeOwned>(&self, bytes: &[u8], flags: u32) -> Result<V, TranscodeError>;

    /// Returns the encoded bytes and the flags to store alongside them.
    fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<(Vec<u8>, u32), TranscodeError>;
}

/// Default transcoder: writes JSON, reads JSON, string and binary formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTranscoder;

impl Transcoder for JsonTranscoder {
    fn decode<V: DeserializeOwned>(&self, bytes: &[u8], flags: u32) -> Result<V, TranscodeError> {
        match flags & FORMAT_MASK {
            0 | FORMAT_JSON => {
                serde_json::from_slice(bytes).map_err(|e| TranscodeError::Json(e.to_string()))
            }
            FORMAT_STRING => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| TranscodeError::Format(e.to_string()))?;
                V::deserialize(StrDeserializer::<ValueError>::new(text))
                    .map_err(|e| TranscodeError::Format(e.to_string()))
            }
            FORMAT_BINARY => V::deserialize(SeqDeserializer::<_, ValueError>::new(
                bytes.iter().copied(),
            ))
            .map_err(|e| TranscodeError::Format(e.to_string())),
            _ => Err(TranscodeError::UnsupportedFlags(flags)),
        }
    }

    fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<(Vec<u8>, u32), TranscodeError> {
        let bytes = serde_json::to_vec(value).map_err(|e| TranscodeError::Json(e.to_string()))?;
        Ok((bytes, FORMAT_JSON))
    }
}
