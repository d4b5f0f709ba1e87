pub mod backend;

use std::sync::OnceLock;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use backend::CompressionBackend;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compression backend not loaded; call StateCodec::init() first")]
    BackendNotLoaded,
    #[error("unknown compression backend: {0:?}")]
    UnknownBackend(String),
    #[error("json encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("compression failed: {0}")]
    Compress(String),
    #[error("invalid {format} payload: {reason}")]
    InvalidPayload {
        format: &'static str,
        reason: String,
    },
    #[error("decompression produced no output (corrupt or wrong-format input)")]
    EmptyOutput,
    #[error("decompressed text is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Text-safe encoding of the compressed payload.
///
/// The payload does not self-describe its format; callers must reuse on
/// deserialize whatever format produced the string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecFormat {
    /// 15 payload bits per UTF-16 code unit; densest for local storage.
    #[default]
    Utf16,
    /// Standard base64; safe for any byte-oriented store.
    Base64,
    /// URL-safe alphabet, unpadded; safe inside URIs.
    Uri,
}

impl CodecFormat {
    pub const ALL: [CodecFormat; 3] = [Self::Utf16, Self::Base64, Self::Uri];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf16 => "utf16",
            Self::Base64 => "base64",
            Self::Uri => "uri",
        }
    }
}

impl std::str::FromStr for CodecFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf16" => Ok(Self::Utf16),
            "base64" => Ok(Self::Base64),
            "uri" => Ok(Self::Uri),
            other => Err(format!("unknown codec format '{other}': use utf16, base64, uri")),
        }
    }
}

impl std::fmt::Display for CodecFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-key value transform applied during JSON encoding/decoding, with
/// `JSON.stringify` replacer semantics: the transform sees `(key, value)`
/// for every node; returning `None` omits object members and nulls array
/// slots. The root is visited with an empty key.
pub type ValueTransform = fn(&str, Value) -> Option<Value>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SerializeOptions {
    pub format: CodecFormat,
    pub replacer: Option<ValueTransform>,
}

impl SerializeOptions {
    pub fn format(format: CodecFormat) -> Self {
        Self {
            format,
            replacer: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeserializeOptions {
    pub format: CodecFormat,
    pub reviver: Option<ValueTransform>,
}

impl DeserializeOptions {
    pub fn format(format: CodecFormat) -> Self {
        Self {
            format,
            reviver: None,
        }
    }
}

static CODEC: OnceLock<StateCodec> = OnceLock::new();

/// Codec for persisting a JSON-serializable state tree as a compact
/// string, with a pluggable compression backend.
pub struct StateCodec {
    backend: &'static dyn CompressionBackend,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl StateCodec {
    /// Load and cache the default compression backend process-wide.
    /// Idempotent: a second call reuses the cached backend.
    pub fn init() -> Result<&'static StateCodec, CodecError> {
        Self::init_named(backend::DEFAULT_BACKEND)
    }

    /// [`init`](Self::init) with an explicit backend name.
    pub fn init_named(name: &str) -> Result<&'static StateCodec, CodecError> {
        if let Some(codec) = CODEC.get() {
            return Ok(codec);
        }
        let backend = backend::lookup(name)?;
        Ok(CODEC.get_or_init(|| StateCodec { backend }))
    }

    /// Whether the process-wide backend has been loaded.
    pub fn is_loaded() -> bool {
        CODEC.get().is_some()
    }

    /// The cached codec, or a loud error when `init()` has not run.
    pub fn global() -> Result<&'static StateCodec, CodecError> {
        CODEC.get().ok_or(CodecError::BackendNotLoaded)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Serialize a value to a compact text-safe string.
    pub fn serialize<T: Serialize>(
        &self,
        value: &T,
        opts: &SerializeOptions,
    ) -> Result<String, CodecError> {
        let mut tree = serde_json::to_value(value).map_err(CodecError::Encode)?;
        if let Some(replacer) = opts.replacer {
            tree = apply_transform("", tree, replacer).unwrap_or(Value::Null);
        }
        let json = tree.to_string();
        let compressed = self.backend.compress(json.as_bytes())?;
        match opts.format {
            CodecFormat::Utf16 => pack_utf16(&compressed),
            CodecFormat::Base64 => Ok(STANDARD.encode(&compressed)),
            CodecFormat::Uri => Ok(URL_SAFE_NO_PAD.encode(&compressed)),
        }
    }

    /// Deserialize a string produced by [`serialize`](Self::serialize)
    /// with the same format. Corrupt or wrong-format input fails with a
    /// typed error, never partial data.
    pub fn deserialize<T: DeserializeOwned>(
        &self,
        input: &str,
        opts: &DeserializeOptions,
    ) -> Result<T, CodecError> {
        let invalid = |e: base64::DecodeError| CodecError::InvalidPayload {
            format: opts.format.as_str(),
            reason: e.to_string(),
        };
        let compressed = match opts.format {
            CodecFormat::Utf16 => unpack_utf16(input),
            CodecFormat::Base64 => STANDARD.decode(input).map_err(invalid),
            CodecFormat::Uri => URL_SAFE_NO_PAD.decode(input).map_err(invalid),
        };
        let compressed = compressed.inspect_err(|e| warn!(%e, "snapshot decode failed"))?;

        let bytes = self
            .backend
            .decompress(&compressed)
            .inspect_err(|e| warn!(%e, "snapshot decompression failed"))?;
        if bytes.is_empty() {
            warn!("snapshot decompressed to nothing");
            return Err(CodecError::EmptyOutput);
        }

        let text = String::from_utf8(bytes).map_err(|e| CodecError::InvalidPayload {
            format: opts.format.as_str(),
            reason: e.to_string(),
        })?;
        let mut tree: Value = serde_json::from_str(&text).map_err(|e| {
            warn!(%e, "snapshot is not valid JSON");
            CodecError::Decode(e)
        })?;
        if let Some(reviver) = opts.reviver {
            tree = apply_transform("", tree, reviver).unwrap_or(Value::Null);
        }
        serde_json::from_value(tree).map_err(CodecError::Decode)
    }
}

/// `len(compressed) / len(original)`, or `1` when there is no size
/// reduction. Pure; usable before or after `init()`.
pub fn compression_ratio(original: &str, compressed: &str) -> f64 {
    if original.is_empty() || compressed.len() >= original.len() {
        return 1.0;
    }
    compressed.len() as f64 / original.len() as f64
}

fn apply_transform(key: &str, value: Value, f: ValueTransform) -> Option<Value> {
    let value = f(key, value)?;
    Some(match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| apply_transform(&k, v, f).map(|v| (k, v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| apply_transform(&i.to_string(), v, f).unwrap_or(Value::Null))
                .collect(),
        ),
        other => other,
    })
}

// ---------------------------------------------------------------------------
// utf16 packing: 15 payload bits per code unit, offset past the controls.
// Every unit stays below the surrogate range, so the output is a plain
// string in any UTF-16-native store.
// ---------------------------------------------------------------------------

const UTF16_OFFSET: u32 = 0x20;
const UTF16_BITS: u32 = 15;
const UTF16_MASK: u32 = (1 << UTF16_BITS) - 1;

fn pack_utf16(bytes: &[u8]) -> Result<String, CodecError> {
    if bytes.len() >= 1 << 30 {
        return Err(CodecError::Compress("payload too large for utf16 packing".into()));
    }
    let len = bytes.len() as u32;
    // Two header units carry the byte length (30 bits).
    let mut units: Vec<u16> = Vec::with_capacity(2 + bytes.len() * 8 / 15 + 1);
    units.push((((len >> UTF16_BITS) & UTF16_MASK) + UTF16_OFFSET) as u16);
    units.push(((len & UTF16_MASK) + UTF16_OFFSET) as u16);

    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in bytes {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= UTF16_BITS {
            bits -= UTF16_BITS;
            units.push((((acc >> bits) & UTF16_MASK) + UTF16_OFFSET) as u16);
        }
    }
    if bits > 0 {
        units.push((((acc << (UTF16_BITS - bits)) & UTF16_MASK) + UTF16_OFFSET) as u16);
    }

    String::from_utf16(&units).map_err(|e| CodecError::Compress(e.to_string()))
}

fn unpack_utf16(input: &str) -> Result<Vec<u8>, CodecError> {
    let invalid = |reason: &str| CodecError::InvalidPayload {
        format: "utf16",
        reason: reason.to_string(),
    };

    let mut values = Vec::with_capacity(input.len());
    for c in input.chars() {
        let unit = c as u32;
        if unit < UTF16_OFFSET || unit > UTF16_OFFSET + UTF16_MASK {
            return Err(invalid("code unit outside the packed range"));
        }
        values.push(unit - UTF16_OFFSET);
    }
    if values.len() < 2 {
        return Err(invalid("missing length header"));
    }

    let len = ((values[0] << UTF16_BITS) | values[1]) as usize;
    let available_bits = (values.len() - 2) as u64 * u64::from(UTF16_BITS);
    if (len as u64) * 8 > available_bits {
        return Err(invalid("truncated payload"));
    }

    let mut out = Vec::with_capacity(len);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for &value in &values[2..] {
        acc = (acc << UTF16_BITS) | value;
        bits += UTF16_BITS;
        while bits >= 8 && out.len() < len {
            bits -= 8;
            out.push(((acc >> bits) & 0xFF) as u8);
        }
        if out.len() == len {
            break;
        }
    }
    if out.len() < len {
        return Err(invalid("truncated payload"));
    }
    Ok(out)
}
