//! Line-oriented textual codec in the JSON-RPC request/response shape.
//!
//! One JSON object per line. Requests are
//! `{"method": "Service.Method", "params": [args], "id": N}` and responses
//! `{"id": N, "result": reply, "error": null}` or
//! `{"id": N, "result": null, "error": "message"}` — exactly one of
//! `result`/`error` is non-null. Malformed JSON or a missing `method`/`id`
//! cannot be resynchronized mid-stream and terminates the connection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::{ClientCodecReader, ClientCodecWriter, ServerCodecReader, ServerCodecWriter};
use crate::error::RpcError;
use crate::wire::{RequestHeader, ResponseHeader};

#[derive(Debug, Serialize, Deserialize)]
struct JsonRequest {
    method: String,
    #[serde(default)]
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonResponse {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Encodes one request line. The single argument travels as the only
/// element of the `params` array.
pub fn encode_request_line(header: &RequestHeader, body: &Value) -> Result<Vec<u8>, RpcError> {
    let mut line = serde_json::to_vec(&JsonRequest {
        method: header.service_method.clone(),
        params: vec![body.clone()],
        id: header.seq,
    })
    .map_err(|err| RpcError::framing(format!("unencodable request: {err}")))?;
    line.push(b'\n');
    Ok(line)
}

fn decode_request_line(line: &str) -> Result<(RequestHeader, Value), RpcError> {
    let request: JsonRequest = serde_json::from_str(line)
        .map_err(|err| RpcError::framing(format!("bad request object: {err}")))?;
    let body = request.params.into_iter().next().unwrap_or(Value::Null);
    Ok((
        RequestHeader {
            service_method: request.method,
            seq: request.id,
        },
        body,
    ))
}

fn encode_response_line(header: &ResponseHeader, body: &Value) -> Result<Vec<u8>, RpcError> {
    let result = match header.error {
        Some(_) => Value::Null,
        None => body.clone(),
    };
    let mut line = serde_json::to_vec(&JsonResponse {
        id: header.seq,
        result,
        error: header.error.clone(),
    })
    .map_err(|err| RpcError::framing(format!("unencodable response: {err}")))?;
    line.push(b'\n');
    Ok(line)
}

/// Decodes one response line into its envelope and payload value.
pub fn decode_response_line(line: &str) -> Result<(ResponseHeader, Value), RpcError> {
    let response: JsonResponse = serde_json::from_str(line)
        .map_err(|err| RpcError::framing(format!("bad response object: {err}")))?;
    Ok((
        ResponseHeader {
            // The textual envelope does not echo the method name; callers
            // correlate purely by id.
            service_method: String::new(),
            seq: response.id,
            error: response.error,
        },
        response.result,
    ))
}

pub(super) struct JsonReader<R> {
    inner: BufReader<R>,
    pending_body: Option<Value>,
}

impl<R> JsonReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    pub(super) fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            pending_body: None,
        }
    }

    /// Reads the next non-blank line, or `None` at end of stream.
    async fn read_line(&mut self) -> Result<Option<String>, RpcError> {
        loop {
            let mut line = String::new();
            let read = self
                .inner
                .read_line(&mut line)
                .await
                .map_err(|err| RpcError::framing(format!("unreadable line: {err}")))?;
            if read == 0 {
                return Ok(None);
            }
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn take_body(&mut self) -> Result<Value, RpcError> {
        self.pending_body
            .take()
            .ok_or_else(|| RpcError::framing("body read with no pending header"))
    }
}

#[async_trait]
impl<R> ServerCodecReader for JsonReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn read_request_header(&mut self) -> Result<Option<RequestHeader>, RpcError> {
        let Some(line) = self.read_line().await? else {
            return Ok(None);
        };
        let (header, body) = decode_request_line(&line)?;
        self.pending_body = Some(body);
        Ok(Some(header))
    }

    async fn read_request_body(&mut self) -> Result<Value, RpcError> {
        self.take_body()
    }
}

#[async_trait]
impl<R> ClientCodecReader for JsonReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn read_response_header(&mut self) -> Result<ResponseHeader, RpcError> {
        let Some(line) = self.read_line().await? else {
            return Err(RpcError::ConnectionClosed);
        };
        let (header, body) = decode_response_line(&line)?;
        self.pending_body = Some(body);
        Ok(header)
    }

    async fn read_response_body(&mut self) -> Result<Value, RpcError> {
        self.take_body()
    }
}

pub(super) struct JsonWriter<W> {
    inner: W,
}

impl<W> JsonWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    pub(super) fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<(), RpcError> {
        self.inner.write_all(line).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W> ServerCodecWriter for JsonWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn write_response(
        &mut self,
        header: &ResponseHeader,
        body: &Value,
    ) -> Result<(), RpcError> {
        let line = encode_response_line(header, body)?;
        self.write_line(&line).await
    }
}

#[async_trait]
impl<W> ClientCodecWriter for JsonWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn write_request(
        &mut self,
        header: &RequestHeader,
        body: &Value,
    ) -> Result<(), RpcError> {
        let line = encode_request_line(header, body)?;
        self.write_line(&line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{client_pair, server_pair, CodecKind};
    use serde_json::json;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[test]
    fn request_line_matches_contract_shape() {
        let header = RequestHeader {
            service_method: "Echo.Echo".to_string(),
            seq: 5,
        };
        let line = encode_request_line(&header, &json!("x")).expect("encode");
        assert_eq!(
            String::from_utf8(line).expect("utf8"),
            "{\"method\":\"Echo.Echo\",\"params\":[\"x\"],\"id\":5}\n"
        );
    }

    #[test]
    fn success_response_line_carries_null_error() {
        let header = ResponseHeader::success("Echo.Echo", 5);
        let line = encode_response_line(&header, &json!("xx")).expect("encode");
        assert_eq!(
            String::from_utf8(line).expect("utf8"),
            "{\"id\":5,\"result\":\"xx\",\"error\":null}\n"
        );
    }

    #[test]
    fn failure_response_line_carries_null_result() {
        let header = ResponseHeader::failure("Foo.Bar", 9, "no such method: Foo.Bar");
        let line = encode_response_line(&header, &json!("ignored")).expect("encode");
        assert_eq!(
            String::from_utf8(line).expect("utf8"),
            "{\"id\":9,\"result\":null,\"error\":\"no such method: Foo.Bar\"}\n"
        );
    }

    #[test]
    fn request_missing_method_or_id_is_a_framing_error() {
        for line in [
            "{\"params\":[\"x\"],\"id\":5}",
            "{\"method\":\"Echo.Echo\",\"params\":[]}",
            "{not json",
        ] {
            let err = decode_request_line(line).expect_err("must fail");
            assert!(matches!(err, RpcError::Framing { .. }), "line {line:?}");
        }
    }

    #[test]
    fn request_without_params_decodes_to_null_body() {
        let (header, body) =
            decode_request_line("{\"method\":\"Echo.Echo\",\"id\":3}").expect("decode");
        assert_eq!(header.seq, 3);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn request_round_trips_through_stream() {
        let (client_side, server_side) = duplex(4096);
        let (read_half, _w) = tokio::io::split(server_side);
        let (_r, write_half) = tokio::io::split(client_side);
        let (mut reader, _) = server_pair(CodecKind::Json, read_half, tokio::io::sink());
        let (_, mut writer) = client_pair(CodecKind::Json, tokio::io::empty(), write_half);

        let header = RequestHeader {
            service_method: "Arith.Add".to_string(),
            seq: 11,
        };
        let body = json!({"a": 1, "b": 2});
        writer.write_request(&header, &body).await.expect("write request");

        let decoded = reader
            .read_request_header()
            .await
            .expect("read header")
            .expect("header present");
        assert_eq!(decoded, header);
        assert_eq!(reader.read_request_body().await.expect("read body"), body);
    }

    #[tokio::test]
    async fn malformed_line_fails_the_connection() {
        let (mut client_side, server_side) = duplex(256);
        client_side
            .write_all(b"{\"method\": \"Echo.Echo\", \"id\": }\n")
            .await
            .expect("write bad line");
        let (read_half, _w) = tokio::io::split(server_side);
        let (mut reader, _) = server_pair(CodecKind::Json, read_half, tokio::io::sink());
        let err = reader.read_request_header().await.expect_err("must fail");
        assert!(err.is_connection_fatal());
    }

    #[tokio::test]
    async fn response_writer_emits_one_line_per_envelope() {
        let (mut probe, remote) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(remote);
        let (_, mut writer) = server_pair(CodecKind::Json, tokio::io::empty(), write_half);

        writer
            .write_response(&ResponseHeader::success("Echo.Echo", 5), &json!("xx"))
            .await
            .expect("write response");
        // Release both halves of the remote end so the probe sees EOF.
        drop(writer);
        drop(read_half);

        let mut raw = Vec::new();
        probe.read_to_end(&mut raw).await.expect("read response bytes");
        assert_eq!(
            String::from_utf8(raw).expect("utf8"),
            "{\"id\":5,\"result\":\"xx\",\"error\":null}\n"
        );
    }
}
