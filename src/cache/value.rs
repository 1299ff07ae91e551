//! Cached Payload Types
//!
//! Values are shared as `Arc<CacheValue>` so a caller that keeps its clone
//! alive can have the value resurrected after the memory tier dropped it.
//!
//! # Disk Frame
//!
//! ```text
//! ┌──────────────┬──────┬─────────────┐
//! │ B7 54 01     │ kind │ payload ... │   kind: 'J' JSON, 'B' bytes
//! └──────────────┴──────┴─────────────┘
//! ```
//!
//! `0xB7` never starts UTF-8 text, so unframed blobs written by older
//! versions or through the raw-bytes API are still recognised and decoded by
//! sniffing: JSON when it parses, raw bytes otherwise.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// Shared handle to a cached value
pub type SharedValue = Arc<CacheValue>;

/// Leading bytes of a framed disk blob
const FRAME_MAGIC: [u8; 3] = [0xB7, b'T', 0x01];
const KIND_JSON: u8 = b'J';
const KIND_BYTES: u8 = b'B';
const FRAME_HEADER_LEN: usize = FRAME_MAGIC.len() + 1;

/// Which tier(s) an operation touched or should touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheType {
    /// Not found / no tier
    #[default]
    None,
    /// Memory tier
    Memory,
    /// Disk tier (or the read-only preload path)
    Disk,
    /// Both tiers
    All,
}

impl CacheType {
    /// True for `None`
    pub fn is_none(&self) -> bool {
        matches!(self, CacheType::None)
    }

    /// True if this scope includes the memory tier
    pub fn includes_memory(&self) -> bool {
        matches!(self, CacheType::Memory | CacheType::All)
    }

    /// True if this scope includes the disk tier
    pub fn includes_disk(&self) -> bool {
        matches!(self, CacheType::Disk | CacheType::All)
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheType::None => write!(f, "none"),
            CacheType::Memory => write!(f, "memory"),
            CacheType::Disk => write!(f, "disk"),
            CacheType::All => write!(f, "all"),
        }
    }
}

/// A cached payload
#[derive(Clone)]
pub enum CacheValue {
    /// Structured JSON document
    Json(serde_json::Value),
    /// Raw bytes (already serialized)
    Bytes(Bytes),
    /// In-process object with no byte form; memory-only
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl CacheValue {
    /// Wrap a JSON document
    pub fn json(value: serde_json::Value) -> Self {
        CacheValue::Json(value)
    }

    /// Wrap raw bytes
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        CacheValue::Bytes(data.into())
    }

    /// Wrap an arbitrary in-process object
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        CacheValue::Opaque(Arc::new(value))
    }

    /// Framed byte form for the disk tier, `None` if the value cannot be
    /// serialized
    pub fn encode(&self) -> Option<Bytes> {
        let (kind, payload) = match self {
            CacheValue::Json(value) => (KIND_JSON, serde_json::to_vec(value).ok()?),
            CacheValue::Bytes(data) => (KIND_BYTES, data.to_vec()),
            CacheValue::Opaque(_) => return None,
        };
        let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        framed.extend_from_slice(&FRAME_MAGIC);
        framed.push(kind);
        framed.extend_from_slice(&payload);
        Some(Bytes::from(framed))
    }

    /// Rebuild a value from disk bytes.
    ///
    /// Framed blobs decode to exactly the variant that was stored. Unframed
    /// blobs are JSON when they parse and raw bytes otherwise.
    pub fn decode(data: Bytes) -> Self {
        if data.len() >= FRAME_HEADER_LEN && data[..FRAME_MAGIC.len()] == FRAME_MAGIC {
            let payload = data.slice(FRAME_HEADER_LEN..);
            match data[FRAME_MAGIC.len()] {
                KIND_BYTES => return CacheValue::Bytes(payload),
                KIND_JSON => {
                    if let Ok(value) = serde_json::from_slice(&payload) {
                        return CacheValue::Json(value);
                    }
                }
                _ => {}
            }
        }
        Self::sniff(data)
    }

    fn sniff(data: Bytes) -> Self {
        match serde_json::from_slice::<serde_json::Value>(&data) {
            Ok(value) => CacheValue::Json(value),
            Err(_) => CacheValue::Bytes(data),
        }
    }

    /// True if the value has a byte form
    pub fn is_serializable(&self) -> bool {
        !matches!(self, CacheValue::Opaque(_))
    }

    /// JSON view, if this is a JSON value
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            CacheValue::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Raw byte view, if this is a byte value
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            CacheValue::Bytes(data) => Some(data),
            _ => None,
        }
    }

    /// Downcast an opaque value
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            CacheValue::Opaque(inner) => inner.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(value: serde_json::Value) -> Self {
        CacheValue::Json(value)
    }
}

impl From<Bytes> for CacheValue {
    fn from(data: Bytes) -> Self {
        CacheValue::Bytes(data)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(data: Vec<u8>) -> Self {
        CacheValue::Bytes(Bytes::from(data))
    }
}

impl PartialEq for CacheValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CacheValue::Json(a), CacheValue::Json(b)) => a == b,
            (CacheValue::Bytes(a), CacheValue::Bytes(b)) => a == b,
            (CacheValue::Opaque(a), CacheValue::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::Json(value) => f.debug_tuple("Json").field(value).finish(),
            CacheValue::Bytes(data) => f.debug_struct("Bytes").field("len", &data.len()).finish(),
            CacheValue::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
