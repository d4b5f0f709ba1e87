use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::CodecError;

/// Default backend name used by [`StateCodec::init`](super::StateCodec::init).
pub const DEFAULT_BACKEND: &str = "deflate";

/// A pluggable byte-level compression format.
pub trait CompressionBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// zlib (RFC 1950) via flate2.
struct Deflate;

static DEFLATE: Deflate = Deflate;

impl CompressionBackend for Deflate {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(input)
            .and_then(|()| encoder.finish())
            .map_err(|e| CodecError::Compress(e.to_string()))
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoder = ZlibDecoder::new(input);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| CodecError::InvalidPayload {
            format: "deflate",
            reason: e.to_string(),
        })?;
        Ok(out)
    }
}

/// Locate a backend by name. The registry is the seam a different
/// compression format would plug into.
pub fn lookup(name: &str) -> Result<&'static dyn CompressionBackend, CodecError> {
    match name {
        "deflate" => Ok(&DEFLATE),
        other => Err(CodecError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_round_trips() {
        let backend = lookup("deflate").unwrap();
        let input = b"the quick brown fox jumps over the lazy dog, twice: \
                      the quick brown fox jumps over the lazy dog";
        let compressed = backend.compress(input).unwrap();
        assert_eq!(backend.decompress(&compressed).unwrap(), input);
        assert!(compressed.len() < input.len());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        match lookup("zstd") {
            Err(CodecError::UnknownBackend(name)) => assert_eq!(name, "zstd"),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("lookup unexpectedly succeeded"),
        }
    }

    #[test]
    fn garbage_input_fails_decompression() {
        let backend = lookup("deflate").unwrap();
        assert!(backend.decompress(b"not zlib at all").is_err());
    }
}
