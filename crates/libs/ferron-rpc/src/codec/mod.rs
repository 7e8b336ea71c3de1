//! Wire codecs.
//!
//! A codec turns call envelopes plus payload values into bytes and back.
//! Header and body decoding are split: the dispatch loop has to see the
//! header before it knows what to do with the body, and an unknown method
//! or sequence id must still consume the body so the stream stays in sync.
//!
//! Two interchangeable implementations exist: a dense length-prefixed
//! binary codec with MessagePack bodies, and a line-oriented textual codec
//! in the JSON-RPC request/response shape.

mod binary;
mod json;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::RpcError;
use crate::wire::{RequestHeader, ResponseHeader};

pub use json::{decode_response_line, encode_request_line};

/// Codec selection, parseable from config and CLI strings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CodecKind {
    #[default]
    Binary,
    Json,
}

impl FromStr for CodecKind {
    type Err = RpcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "binary" => Ok(Self::Binary),
            "json" => Ok(Self::Json),
            other => Err(RpcError::registration(format!(
                "unknown codec {other:?}, expected \"binary\" or \"json\""
            ))),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Server-side read half. Owned exclusively by one dispatch loop.
#[async_trait]
pub trait ServerCodecReader: Send {
    /// Reads the next request header. `Ok(None)` is a clean end of stream
    /// between frames; an error mid-frame is a framing failure.
    async fn read_request_header(&mut self) -> Result<Option<RequestHeader>, RpcError>;

    /// Reads the body belonging to the last decoded header.
    async fn read_request_body(&mut self) -> Result<Value, RpcError>;
}

/// Server-side write half. Shared behind a lock so concurrently completing
/// calls never interleave partial frames.
#[async_trait]
pub trait ServerCodecWriter: Send {
    async fn write_response(
        &mut self,
        header: &ResponseHeader,
        body: &Value,
    ) -> Result<(), RpcError>;
}

/// Client-side read half. Owned exclusively by the background reader task.
#[async_trait]
pub trait ClientCodecReader: Send {
    async fn read_response_header(&mut self) -> Result<ResponseHeader, RpcError>;

    /// Reads the body belonging to the last decoded header. Called even
    /// when the sequence id is unknown, so the stream never desynchronizes.
    async fn read_response_body(&mut self) -> Result<Value, RpcError>;
}

/// Client-side write half.
#[async_trait]
pub trait ClientCodecWriter: Send {
    async fn write_request(&mut self, header: &RequestHeader, body: &Value)
        -> Result<(), RpcError>;
}

/// Binds a codec to the halves of a server connection.
pub fn server_pair<R, W>(
    kind: CodecKind,
    reader: R,
    writer: W,
) -> (Box<dyn ServerCodecReader>, Box<dyn ServerCodecWriter>)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    match kind {
        CodecKind::Binary => (
            Box::new(binary::BinaryReader::new(reader)),
            Box::new(binary::BinaryWriter::new(writer)),
        ),
        CodecKind::Json => (
            Box::new(json::JsonReader::new(reader)),
            Box::new(json::JsonWriter::new(writer)),
        ),
    }
}

/// Binds a codec to the halves of a client connection.
pub fn client_pair<R, W>(
    kind: CodecKind,
    reader: R,
    writer: W,
) -> (Box<dyn ClientCodecReader>, Box<dyn ClientCodecWriter>)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    match kind {
        CodecKind::Binary => (
            Box::new(binary::BinaryReader::new(reader)),
            Box::new(binary::BinaryWriter::new(writer)),
        ),
        CodecKind::Json => (
            Box::new(json::JsonReader::new(reader)),
            Box::new(json::JsonWriter::new(writer)),
        ),
    }
}
