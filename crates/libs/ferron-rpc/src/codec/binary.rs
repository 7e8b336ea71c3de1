//! Length-prefixed binary codec.
//!
//! Each envelope is a header frame followed by a body. The header frame is
//! a 4-byte big-endian length and then four fields: `service_method`
//! (u32 length + UTF-8 bytes), `seq` (u64 BE), `body_len` (u32 BE) and
//! `error` (u32 length + UTF-8 bytes, empty meaning no error). The body is
//! exactly `body_len` bytes of MessagePack encoding the payload value.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::{ClientCodecReader, ClientCodecWriter, ServerCodecReader, ServerCodecWriter};
use crate::error::RpcError;
use crate::wire::{RequestHeader, ResponseHeader};

/// Upper bound on a single header or body, shared by encode and decode. A
/// corrupt length prefix must not turn into a multi-gigabyte allocation.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
struct FrameHeader {
    service_method: String,
    seq: u64,
    body_len: u32,
    error: Option<String>,
}

fn put_string(frame: &mut Vec<u8>, text: &str) -> Result<(), RpcError> {
    let len = u32::try_from(text.len())
        .map_err(|_| RpcError::framing("string field too large"))?;
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(text.as_bytes());
    Ok(())
}

fn get_bytes<'f>(frame: &'f [u8], pos: &mut usize, len: usize) -> Result<&'f [u8], RpcError> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= frame.len())
        .ok_or_else(|| RpcError::framing("truncated header field"))?;
    let bytes = &frame[*pos..end];
    *pos = end;
    Ok(bytes)
}

fn get_u32(frame: &[u8], pos: &mut usize) -> Result<u32, RpcError> {
    let bytes = get_bytes(frame, pos, 4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    Ok(u32::from_be_bytes(buf))
}

fn get_u64(frame: &[u8], pos: &mut usize) -> Result<u64, RpcError> {
    let bytes = get_bytes(frame, pos, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(buf))
}

fn get_string(frame: &[u8], pos: &mut usize) -> Result<String, RpcError> {
    let len = get_u32(frame, pos)? as usize;
    let bytes = get_bytes(frame, pos, len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| RpcError::framing("header field is not valid UTF-8"))
}

fn encode_header(header: &FrameHeader) -> Result<Vec<u8>, RpcError> {
    // Reserve 4 bytes for the frame length prefix and patch it afterwards.
    let mut frame = Vec::with_capacity(64);
    frame.extend_from_slice(&[0u8; 4]);
    put_string(&mut frame, &header.service_method)?;
    frame.extend_from_slice(&header.seq.to_be_bytes());
    frame.extend_from_slice(&header.body_len.to_be_bytes());
    put_string(&mut frame, header.error.as_deref().unwrap_or(""))?;
    let payload_len = frame.len() - 4;
    if payload_len > MAX_FRAME_LEN {
        return Err(RpcError::framing("header frame too large"));
    }
    let len = u32::try_from(payload_len).map_err(|_| RpcError::framing("header frame too large"))?;
    frame[..4].copy_from_slice(&len.to_be_bytes());
    Ok(frame)
}

fn decode_header(frame: &[u8]) -> Result<FrameHeader, RpcError> {
    let mut pos = 0;
    let service_method = get_string(frame, &mut pos)?;
    let seq = get_u64(frame, &mut pos)?;
    let body_len = get_u32(frame, &mut pos)?;
    let error = get_string(frame, &mut pos)?;
    if pos != frame.len() {
        return Err(RpcError::framing("trailing bytes in header frame"));
    }
    Ok(FrameHeader {
        service_method,
        seq,
        body_len,
        error: (!error.is_empty()).then_some(error),
    })
}

fn map_read_err(err: std::io::Error) -> RpcError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        RpcError::framing("truncated frame")
    } else {
        RpcError::from(err)
    }
}

pub(super) struct BinaryReader<R> {
    inner: BufReader<R>,
    pending_body: Option<usize>,
}

impl<R> BinaryReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    pub(super) fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            pending_body: None,
        }
    }

    /// Reads one length-prefixed frame. `Ok(None)` only at a clean frame
    /// boundary; end of stream inside a frame is a framing error.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, RpcError> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            let read = self
                .inner
                .read(&mut len_buf[filled..])
                .await
                .map_err(RpcError::from)?;
            if read == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(RpcError::framing("truncated frame length"));
            }
            filled += read;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(RpcError::framing(format!(
                "header frame of {len} bytes exceeds limit"
            )));
        }
        let mut frame = vec![0u8; len];
        self.inner.read_exact(&mut frame).await.map_err(map_read_err)?;
        Ok(Some(frame))
    }

    async fn read_header(&mut self) -> Result<Option<FrameHeader>, RpcError> {
        let Some(frame) = self.read_frame().await? else {
            return Ok(None);
        };
        let header = decode_header(&frame)?;
        let body_len = header.body_len as usize;
        if body_len > MAX_FRAME_LEN {
            return Err(RpcError::framing(format!(
                "body of {body_len} bytes exceeds limit"
            )));
        }
        self.pending_body = Some(body_len);
        Ok(Some(header))
    }

    async fn read_body(&mut self) -> Result<Value, RpcError> {
        let len = self
            .pending_body
            .take()
            .ok_or_else(|| RpcError::framing("body read with no pending header"))?;
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await.map_err(map_read_err)?;
        if buf.is_empty() {
            return Ok(Value::Null);
        }
        rmp_serde::from_slice(&buf)
            .map_err(|err| RpcError::framing(format!("undecodable body: {err}")))
    }
}

#[async_trait]
impl<R> ServerCodecReader for BinaryReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn read_request_header(&mut self) -> Result<Option<RequestHeader>, RpcError> {
        Ok(self.read_header().await?.map(|header| RequestHeader {
            service_method: header.service_method,
            seq: header.seq,
        }))
    }

    async fn read_request_body(&mut self) -> Result<Value, RpcError> {
        self.read_body().await
    }
}

#[async_trait]
impl<R> ClientCodecReader for BinaryReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn read_response_header(&mut self) -> Result<ResponseHeader, RpcError> {
        match self.read_header().await? {
            Some(header) => Ok(ResponseHeader {
                service_method: header.service_method,
                seq: header.seq,
                error: header.error,
            }),
            None => Err(RpcError::ConnectionClosed),
        }
    }

    async fn read_response_body(&mut self) -> Result<Value, RpcError> {
        self.read_body().await
    }
}

pub(super) struct BinaryWriter<W> {
    inner: W,
}

impl<W> BinaryWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    pub(super) fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    async fn write_envelope(
        &mut self,
        service_method: &str,
        seq: u64,
        error: Option<&str>,
        body: &Value,
    ) -> Result<(), RpcError> {
        let body_bytes = rmp_serde::to_vec(body)
            .map_err(|err| RpcError::framing(format!("unencodable body: {err}")))?;
        if body_bytes.len() > MAX_FRAME_LEN {
            return Err(RpcError::framing("body frame too large"));
        }
        let header = encode_header(&FrameHeader {
            service_method: service_method.to_string(),
            seq,
            body_len: body_bytes.len() as u32,
            error: error.map(str::to_string),
        })?;
        self.inner.write_all(&header).await?;
        self.inner.write_all(&body_bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W> ServerCodecWriter for BinaryWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn write_response(
        &mut self,
        header: &ResponseHeader,
        body: &Value,
    ) -> Result<(), RpcError> {
        self.write_envelope(
            &header.service_method,
            header.seq,
            header.error.as_deref(),
            body,
        )
        .await
    }
}

#[async_trait]
impl<W> ClientCodecWriter for BinaryWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn write_request(
        &mut self,
        header: &RequestHeader,
        body: &Value,
    ) -> Result<(), RpcError> {
        self.write_envelope(&header.service_method, header.seq, None, body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{client_pair, server_pair, CodecKind};
    use serde_json::json;
    use tokio::io::duplex;

    #[test]
    fn header_frame_round_trips() {
        let header = FrameHeader {
            service_method: "Echo.Echo".to_string(),
            seq: 42,
            body_len: 9,
            error: Some("boom".to_string()),
        };
        let encoded = encode_header(&header).expect("encode header");
        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&encoded[..4]);
        assert_eq!(u32::from_be_bytes(len_buf) as usize + 4, encoded.len());
        assert_eq!(decode_header(&encoded[4..]).expect("decode header"), header);
    }

    #[test]
    fn decode_header_rejects_truncated_and_trailing_bytes() {
        let header = FrameHeader {
            service_method: "Echo.Echo".to_string(),
            seq: 1,
            body_len: 0,
            error: None,
        };
        let encoded = encode_header(&header).expect("encode header");
        assert!(decode_header(&encoded[4..encoded.len() - 2]).is_err());

        let mut padded = encoded[4..].to_vec();
        padded.push(0);
        assert!(decode_header(&padded).is_err());
    }

    #[tokio::test]
    async fn request_round_trips_through_stream() {
        let (client_side, server_side) = duplex(4096);
        let (read_half, _w) = tokio::io::split(server_side);
        let (_r, write_half) = tokio::io::split(client_side);
        let (mut reader, _) = server_pair(CodecKind::Binary, read_half, tokio::io::sink());
        let (_, mut writer) = client_pair(CodecKind::Binary, tokio::io::empty(), write_half);

        let header = RequestHeader {
            service_method: "Arith.Add".to_string(),
            seq: 7,
        };
        let body = json!({"a": 2, "b": 40});
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
    async fn response_error_round_trips_through_stream() {
        let (client_side, server_side) = duplex(4096);
        let (read_half, _w) = tokio::io::split(client_side);
        let (_r, write_half) = tokio::io::split(server_side);
        let (mut reader, _) = client_pair(CodecKind::Binary, read_half, tokio::io::sink());
        let (_, mut writer) = server_pair(CodecKind::Binary, tokio::io::empty(), write_half);

        let header = ResponseHeader::failure("Foo.Bar", 9, "no such method: Foo.Bar");
        writer
            .write_response(&header, &Value::Null)
            .await
            .expect("write response");

        let decoded = reader.read_response_header().await.expect("read header");
        assert_eq!(decoded, header);
        assert_eq!(reader.read_response_body().await.expect("read body"), Value::Null);
    }

    #[tokio::test]
    async fn clean_eof_between_frames_is_none() {
        let (client_side, server_side) = duplex(64);
        drop(client_side);
        let (read_half, _w) = tokio::io::split(server_side);
        let (mut reader, _) = server_pair(CodecKind::Binary, read_half, tokio::io::sink());
        assert!(reader.read_request_header().await.expect("clean eof").is_none());
    }

    #[tokio::test]
    async fn eof_inside_frame_is_framing_error() {
        let (mut client_side, server_side) = duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client_side, &[0, 0, 0, 32, 1, 2])
            .await
            .expect("write partial frame");
        drop(client_side);
        let (read_half, _w) = tokio::io::split(server_side);
        let (mut reader, _) = server_pair(CodecKind::Binary, read_half, tokio::io::sink());
        let err = reader.read_request_header().await.expect_err("must fail");
        assert!(matches!(err, RpcError::Framing { .. }));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_without_allocation() {
        let (mut client_side, server_side) = duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut client_side, &u32::MAX.to_be_bytes())
            .await
            .expect("write length");
        drop(client_side);
        let (read_half, _w) = tokio::io::split(server_side);
        let (mut reader, _) = server_pair(CodecKind::Binary, read_half, tokio::io::sink());
        let err = reader.read_request_header().await.expect_err("must fail");
        assert!(matches!(err, RpcError::Framing { .. }));
    }

    #[tokio::test]
    async fn fuzz_smoke_random_bytes_never_panic_the_decoder() {
        let mut seed = 0xA5A5_5A5A_1234_5678_u64;
        for _ in 0..200 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            let len = ((seed >> 16) as usize) % 96;
            let mut bytes = vec![0_u8; len];
            let mut stream = seed ^ 0x9E37_79B9_7F4A_7C15;
            for byte in &mut bytes {
                stream = stream.rotate_left(9).wrapping_mul(0xD134_2543_DE82_E285);
                *byte = (stream & 0xFF) as u8;
            }

            let (mut tx, rx) = duplex(4096);
            tokio::io::AsyncWriteExt::write_all(&mut tx, &bytes)
                .await
                .expect("write fuzz bytes");
            drop(tx);
            let (read_half, _w) = tokio::io::split(rx);
            let (mut reader, _) = server_pair(CodecKind::Binary, read_half, tokio::io::sink());
            let _ = reader.read_request_header().await;
        }
    }
}
