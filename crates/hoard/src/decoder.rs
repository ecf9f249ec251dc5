//! # Decoders
//!
//! Turn a downloaded file into the value a resource item hands out. Decoding
//! runs on the blocking thread pool, so implementations may use plain
//! synchronous I/O.

use std::io::Read;
use std::path::Path;

use bytes::Bytes;

use crate::DecodeError;

/// Budget a consumer passes along with a content request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeHint {
    /// Upper bound on the decoded size, if the consumer has one
    pub max_bytes: Option<u64>,
}

impl SizeHint {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn max_bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes: Some(max_bytes),
        }
    }
}

/// Produces a typed value from a local file
pub trait Decoder: Send + Sync + 'static {
    type Output: Send + 'static;

    fn decode(&self, path: &Path, hint: SizeHint) -> Result<Self::Output, DecodeError>;
}

/// Reads the file into memory. Empty files are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesDecoder;

impl Decoder for BytesDecoder {
    type Output = Bytes;

    fn decode(&self, path: &Path, hint: SizeHint) -> Result<Bytes, DecodeError> {
        let file = std::fs::File::open(path).map_err(|e| DecodeError::new(path, e.to_string()))?;

        let mut data = Vec::new();
        let read = match hint.max_bytes {
            Some(max) => file.take(max).read_to_end(&mut data),
            None => {
                let mut file = file;
                file.read_to_end(&mut data)
            }
        };
        read.map_err(|e| DecodeError::new(path, e.to_string()))?;

        if data.is_empty() {
            return Err(DecodeError::new(path, "file is empty"));
        }
        Ok(Bytes::from(data))
    }
}

/// Reads the file as UTF-8 text
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl Decoder for TextDecoder {
    type Output = String;

    fn decode(&self, path: &Path, hint: SizeHint) -> Result<String, DecodeError> {
        let bytes = BytesDecoder.decode(path, hint)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::new(path, e.to_string()))
    }
}
