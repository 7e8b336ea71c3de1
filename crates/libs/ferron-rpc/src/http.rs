//! Single-exchange HTTP adapter.
//!
//! One call per `POST /rpc` exchange: the request body holds exactly one
//! textual-codec request line, the response body the matching response
//! line. The body and an in-memory pipe form a synthetic duplex stream fed
//! through the same dispatch path as the streaming transport, so the codec
//! and registry logic apply unchanged. With one call per exchange there is
//! nothing for sequence ids to collide with; they are echoed verbatim.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::codec::{decode_response_line, encode_request_line, CodecKind};
use crate::error::RpcError;
use crate::server::Server;
use crate::wire::RequestHeader;

/// Byte offset of the `\r\n\r\n` separator, if the headers are complete.
pub fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

pub fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(headers).ok()?;
    for line in text.lines().skip(1) {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            return value.trim().parse().ok();
        }
    }
    None
}

fn parse_request_line(headers: &[u8]) -> Option<(&str, &str)> {
    let text = std::str::from_utf8(headers).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    Some((method, path))
}

fn parse_status_code(response: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(response).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    let _http_version = parts.next()?;
    parts.next()?.parse().ok()
}

fn build_response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut raw = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    raw.extend_from_slice(body);
    raw
}

pub fn build_error_response(status: &str, message: &str) -> Vec<u8> {
    build_response(status, "text/plain", message.as_bytes())
}

/// Accept loop for the HTTP transport: one exchange per connection, then
/// the connection is discarded.
pub async fn serve(listener: TcpListener, server: Arc<Server>) -> Result<(), RpcError> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        log::debug!("accepted http rpc exchange peer={peer_addr}");
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            handle_exchange(stream, &server).await;
        });
    }
}

/// Reads one HTTP request, runs at most one RPC through the shared
/// registry, writes one HTTP response, and shuts the stream down.
pub async fn handle_exchange<S>(mut stream: S, server: &Server)
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let response = match read_http_request(&mut stream).await {
        Ok(raw) => respond(&raw, server).await,
        Err(err) => {
            log::debug!("http exchange aborted: {err}");
            build_error_response("400 Bad Request", "unreadable request")
        }
    };
    let _ = stream.write_all(&response).await;
    let _ = stream.shutdown().await;
}

async fn read_http_request<S>(stream: &mut S) -> Result<Vec<u8>, RpcError>
where
    S: AsyncRead + Send + Unpin,
{
    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 4096];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if let Some(header_end) = find_header_end(&raw) {
            let headers = &raw[..header_end];
            match parse_content_length(headers) {
                // An overflowing declared length can never be satisfied;
                // stop reading and let the responder reject it.
                Some(length) => match (header_end + 4).checked_add(length) {
                    Some(total) if raw.len() < total => continue,
                    _ => break,
                },
                None => break,
            }
        }
    }
    if raw.is_empty() {
        return Err(RpcError::framing("empty http request"));
    }
    Ok(raw)
}

async fn respond(raw: &[u8], server: &Server) -> Vec<u8> {
    let Some(header_end) = find_header_end(raw) else {
        return build_error_response("400 Bad Request", "incomplete headers");
    };
    let headers = &raw[..header_end];
    match parse_request_line(headers) {
        Some(("POST", "/rpc")) => {}
        Some(_) => return build_error_response("404 Not Found", "not found"),
        None => return build_error_response("400 Bad Request", "malformed request line"),
    }
    let Some(length) = parse_content_length(headers) else {
        return build_error_response("400 Bad Request", "missing content-length");
    };
    let body_start = header_end + 4;
    let Some(body_end) = body_start.checked_add(length) else {
        return build_error_response("400 Bad Request", "unreasonable content-length");
    };
    let Some(body) = raw.get(body_start..body_end) else {
        return build_error_response("400 Bad Request", "truncated body");
    };

    match run_exchange(body, server).await {
        Ok(response_body) => build_response("200 OK", "application/json", &response_body),
        Err(err) => build_error_response("400 Bad Request", &err.to_string()),
    }
}

/// Feeds the body through a synthetic duplex stream into the one-shot
/// server path and collects the single response line.
async fn run_exchange(body: &[u8], server: &Server) -> Result<Vec<u8>, RpcError> {
    let (mut local, remote) = tokio::io::duplex(256 * 1024);
    let (served, _pushed) = tokio::join!(server.serve_once(remote, CodecKind::Json), async {
        local.write_all(body).await?;
        local.shutdown().await
    });
    served?;

    let mut response_line = Vec::new();
    local.read_to_end(&mut response_line).await?;
    Ok(response_line)
}

/// Client half of the adapter: posts one request over a fresh connection
/// and decodes the response body.
pub async fn call(addr: &str, service_method: &str, args: &Value) -> Result<Value, RpcError> {
    let header = RequestHeader {
        service_method: service_method.to_string(),
        seq: 1,
    };
    let body = encode_request_line(&header, args)?;

    let mut stream = TcpStream::connect(addr).await?;
    let head = format!(
        "POST /rpc HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    let header_end =
        find_header_end(&raw).ok_or_else(|| RpcError::framing("malformed http response"))?;
    match parse_status_code(&raw) {
        Some(200) => {}
        Some(status) => {
            return Err(RpcError::Transport {
                message: format!("http status {status}"),
            })
        }
        None => return Err(RpcError::framing("malformed http status line")),
    }
    let text = std::str::from_utf8(&raw[header_end + 4..])
        .map_err(|_| RpcError::framing("response body is not valid UTF-8"))?;
    let (response, value) = decode_response_line(text)?;
    match response.error {
        Some(message) => Err(RpcError::from_wire(&message)),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_header_end_locates_separator() {
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nrest"), Some(23));
        assert_eq!(find_header_end(b"GET / HTTP/1.1\r\nHost: x\r\n"), None);
    }

    #[test]
    fn parse_content_length_is_case_insensitive() {
        let headers = b"POST /rpc HTTP/1.1\r\ncontent-LENGTH: 12\r\nHost: y";
        assert_eq!(parse_content_length(headers), Some(12));
        assert_eq!(parse_content_length(b"POST /rpc HTTP/1.1\r\nHost: y"), None);
    }

    #[test]
    fn parse_status_code_reads_numeric_status() {
        assert_eq!(parse_status_code(b"HTTP/1.1 200 OK\r\n\r\n"), Some(200));
        assert_eq!(parse_status_code(b"HTTP/1.1 404 Not Found\r\n\r\n"), Some(404));
        assert_eq!(parse_status_code(b"garbage"), None);
    }

    #[test]
    fn build_response_carries_length_and_body() {
        let raw = build_response("200 OK", "application/json", b"{}");
        let text = String::from_utf8(raw).expect("utf8");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }
}
