//! Protocol module - framing and envelopes.
//!
//! This module implements the binary protocol spoken on every connection:
//! - 8-byte length-prefixed frames
//! - Request/response envelopes carried inside each frame

mod envelope;
mod wire_format;

pub use envelope::{Request, Response, ENVELOPE_HEADER_SIZE, PROTOCOL_VERSION};
pub use wire_format::{
    encode_frame, read_frame, read_frame_or_eof, write_frame, DEFAULT_MAX_FRAME_SIZE,
    FRAME_LENGTH_SIZE,
};
