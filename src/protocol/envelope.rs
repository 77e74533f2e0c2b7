//! Request and response envelopes.
//!
//! Both directions share one binary layout, carried as the body of a frame:
//! ```text
//! ┌────────────┬─────────┬────────────┬────────────┬─────────┬─────────┬─────────┬─────────┐
//! │ Message ID │ Version │ Compressor │ Serializer │ Svc len │ Mth len │ Err len │ Pay len │
//! │ 8 bytes    │ 1 byte  │ 1 byte     │ 1 byte     │ 4 bytes │ 4 bytes │ 4 bytes │ 4 bytes │
//! │ uint64 BE  │         │            │            │ u32 BE  │ u32 BE  │ u32 BE  │ u32 BE  │
//! └────────────┴─────────┴────────────┴────────────┴─────────┴─────────┴─────────┴─────────┘
//! followed by: service name │ method name │ error text │ payload
//! ```
//!
//! Requests leave the error text empty; responses leave both names empty.

use bytes::Bytes;

use crate::error::{Result, RpcError};

/// Size of the fixed envelope header in bytes.
pub const ENVELOPE_HEADER_SIZE: usize = 27;

/// Protocol version written by this crate.
pub const PROTOCOL_VERSION: u8 = 1;

/// A call travelling from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Correlates the response with this request.
    pub message_id: u64,
    /// Protocol version.
    pub version: u8,
    /// Compressor applied to `payload`.
    pub compressor_id: u8,
    /// Serializer that produced `payload`.
    pub serializer_id: u8,
    /// Registered service name.
    pub service_name: String,
    /// Method within the service.
    pub method_name: String,
    /// Serialized (and possibly compressed) argument.
    pub payload: Bytes,
}

/// The server's answer to one [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Copied from the request.
    pub message_id: u64,
    /// Copied from the request.
    pub version: u8,
    /// Copied from the request.
    pub compressor_id: u8,
    /// Copied from the request.
    pub serializer_id: u8,
    /// Serialized result; empty when the handler produced no value.
    pub payload: Bytes,
    /// Empty on success, otherwise the business error message.
    pub error: String,
}

impl Request {
    /// Encode into envelope bytes (the body of one frame).
    ///
    /// # Errors
    ///
    /// [`RpcError::FrameTooLarge`] if a field is longer than its `u32` length
    /// prefix can describe.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_parts(
            self.message_id,
            self.version,
            self.compressor_id,
            self.serializer_id,
            [
                self.service_name.as_bytes(),
                self.method_name.as_bytes(),
                b"",
                &self.payload,
            ],
        )
    }

    /// Decode from envelope bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use bytes::Bytes;
    /// use minirpc::protocol::Request;
    ///
    /// let req = Request {
    ///     message_id: 7,
    ///     version: 1,
    ///     compressor_id: 0,
    ///     serializer_id: 1,
    ///     service_name: "user-service".into(),
    ///     method_name: "GetById".into(),
    ///     payload: Bytes::from_static(br#"{"Id":123}"#),
    /// };
    /// assert_eq!(Request::decode(&req.encode().unwrap()).unwrap(), req);
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let raw = RawEnvelope::parse(buf)?;
        Ok(Self {
            message_id: raw.message_id,
            version: raw.version,
            compressor_id: raw.compressor_id,
            serializer_id: raw.serializer_id,
            service_name: utf8(raw.fields[0], "service name")?,
            method_name: utf8(raw.fields[1], "method name")?,
            payload: Bytes::copy_from_slice(raw.fields[3]),
        })
    }
}

impl Response {
    /// Start a response that echoes the request's identity fields.
    pub fn for_request(req: &Request) -> Self {
        Self {
            message_id: req.message_id,
            version: req.version,
            compressor_id: req.compressor_id,
            serializer_id: req.serializer_id,
            payload: Bytes::new(),
            error: String::new(),
        }
    }

    /// Set the error text.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    /// True when the handler reported an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Encode into envelope bytes (the body of one frame).
    ///
    /// # Errors
    ///
    /// [`RpcError::FrameTooLarge`] if a field is longer than its `u32` length
    /// prefix can describe.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_parts(
            self.message_id,
            self.version,
            self.compressor_id,
            self.serializer_id,
            [b"", b"", self.error.as_bytes(), &self.payload],
        )
    }

    /// Decode from envelope bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let raw = RawEnvelope::parse(buf)?;
        Ok(Self {
            message_id: raw.message_id,
            version: raw.version,
            compressor_id: raw.compressor_id,
            serializer_id: raw.serializer_id,
            payload: Bytes::copy_from_slice(raw.fields[3]),
            error: utf8(raw.fields[2], "error text")?,
        })
    }
}

/// Borrowed view over a parsed envelope.
struct RawEnvelope<'a> {
    message_id: u64,
    version: u8,
    compressor_id: u8,
    serializer_id: u8,
    /// Service name, method name, error text, payload.
    fields: [&'a [u8]; 4],
}

impl<'a> RawEnvelope<'a> {
    fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < ENVELOPE_HEADER_SIZE {
            return Err(RpcError::MalformedEnvelope(format!(
                "envelope of {} bytes is shorter than the {} byte header",
                buf.len(),
                ENVELOPE_HEADER_SIZE
            )));
        }

        let message_id = u64::from_be_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ]);
        let (version, compressor_id, serializer_id) = (buf[8], buf[9], buf[10]);

        let mut rest = &buf[ENVELOPE_HEADER_SIZE..];
        let mut fields: [&[u8]; 4] = [&[]; 4];
        for (i, field) in fields.iter_mut().enumerate() {
            let at = 11 + i * 4;
            let len = u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]) as usize;
            if len > rest.len() {
                return Err(RpcError::MalformedEnvelope(format!(
                    "{} declares {} bytes but only {} remain",
                    FIELD_NAMES[i],
                    len,
                    rest.len()
                )));
            }
            let (head, tail) = rest.split_at(len);
            *field = head;
            rest = tail;
        }

        if !rest.is_empty() {
            return Err(RpcError::MalformedEnvelope(format!(
                "{} trailing bytes after payload",
                rest.len()
            )));
        }

        Ok(Self {
            message_id,
            version,
            compressor_id,
            serializer_id,
            fields,
        })
    }
}

const FIELD_NAMES: [&str; 4] = ["service name", "method name", "error text", "payload"];

fn encode_parts(
    message_id: u64,
    version: u8,
    compressor_id: u8,
    serializer_id: u8,
    fields: [&[u8]; 4],
) -> Result<Vec<u8>> {
    let body: usize = fields.iter().map(|f| f.len()).sum();
    let mut buf = Vec::with_capacity(ENVELOPE_HEADER_SIZE + body);
    buf.extend_from_slice(&message_id.to_be_bytes());
    buf.push(version);
    buf.push(compressor_id);
    buf.push(serializer_id);
    for field in &fields {
        buf.extend_from_slice(&field_len(field.len())?.to_be_bytes());
    }
    for field in &fields {
        buf.extend_from_slice(field);
    }
    Ok(buf)
}

fn field_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| RpcError::FrameTooLarge {
        len: len as u64,
        max: u64::from(u32::MAX),
    })
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| RpcError::MalformedEnvelope(format!("{what} is not valid UTF-8")))
}
