//! Codec module - serialization of call arguments and results.
//!
//! Payloads inside an envelope are opaque bytes. The codec that produced them
//! travels alongside as the envelope's `serializer_id`, so the server can pick
//! the matching decoder per request:
//!
//! - [`JsonCodec`] - `serde_json` (id 1, the default)
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (id 2)
//!
//! # Design
//!
//! Concrete codecs are marker structs with static methods. [`Codec`] is the
//! runtime selector that maps a wire id to one of them; it is an enum rather
//! than a trait object because the encode/decode methods are generic.
//!
//! # Example
//!
//! ```
//! use minirpc::codec::Codec;
//!
//! let codec = Codec::from_id(2).unwrap();
//! let bytes = codec.encode(&"hello").unwrap();
//! let back: String = codec.decode(&bytes).unwrap();
//! assert_eq!(back, "hello");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, RpcError};

/// Wire id of [`Codec::Json`].
pub const JSON_SERIALIZER_ID: u8 = 1;

/// Wire id of [`Codec::MsgPack`].
pub const MSGPACK_SERIALIZER_ID: u8 = 2;

/// Serializer selected by an envelope's `serializer_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// JSON via `serde_json`.
    #[default]
    Json,
    /// MessagePack via `rmp-serde`.
    MsgPack,
}

impl Codec {
    /// Resolve a codec from its wire id.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            JSON_SERIALIZER_ID => Ok(Codec::Json),
            MSGPACK_SERIALIZER_ID => Ok(Codec::MsgPack),
            other => Err(RpcError::UnknownSerializer(other)),
        }
    }

    /// Wire id stamped into envelopes.
    #[inline]
    pub fn id(self) -> u8 {
        match self {
            Codec::Json => JSON_SERIALIZER_ID,
            Codec::MsgPack => MSGPACK_SERIALIZER_ID,
        }
    }

    /// Encode a value to bytes.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json => JsonCodec::encode(value),
            Codec::MsgPack => MsgPackCodec::encode(value),
        }
    }

    /// Decode bytes into a value of type `T`.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::Json => JsonCodec::decode(bytes),
            Codec::MsgPack => MsgPackCodec::decode(bytes),
        }
    }
}
