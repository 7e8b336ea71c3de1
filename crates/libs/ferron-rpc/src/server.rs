//! Server side: accept loop and per-connection dispatch loop.
//!
//! Requests are read strictly sequentially off the stream, but every
//! decoded request runs on its own blocking task, so a slow handler never
//! stalls sibling calls on the same connection. Responses may therefore
//! complete out of order; the shared write half sits behind a lock so two
//! completing calls never interleave partial frames.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::codec::{self, CodecKind, ServerCodecWriter};
use crate::error::RpcError;
use crate::registry::Registry;
use crate::wire::ResponseHeader;

pub struct Server {
    registry: Arc<Registry>,
}

impl Server {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Accept loop for the streaming transport: one spawned dispatch loop
    /// per accepted connection.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        kind: CodecKind,
    ) -> Result<(), RpcError> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            log::debug!("accepted rpc connection peer={peer_addr} codec={kind}");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.serve_conn(stream, kind).await;
            });
        }
    }

    /// Dispatch loop over any long-lived duplex stream.
    ///
    /// Exits on clean EOF or the first framing/transport error. Invocations
    /// still running at that point finish on their own tasks; their writes
    /// fail against the torn-down stream and the responses are discarded.
    pub async fn serve_conn<S>(&self, stream: S, kind: CodecKind)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (mut reader, writer) = codec::server_pair(kind, read_half, write_half);
        let writer = Arc::new(Mutex::new(writer));

        loop {
            let header = match reader.read_request_header().await {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(err) => {
                    log::warn!("rpc connection failed reading header: {err}");
                    break;
                }
            };
            let body = match reader.read_request_body().await {
                Ok(body) => body,
                Err(err) => {
                    log::warn!("rpc connection failed reading body: {err}");
                    break;
                }
            };

            let registry = Arc::clone(&self.registry);
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                let response = dispatch_one(&registry, header.service_method, header.seq, body).await;
                write_response(&writer, response).await;
            });
        }
    }

    /// Processes exactly one request/response pair and returns. Used by the
    /// single-exchange HTTP adapter; the codec and registry logic are the
    /// same as for the streaming loop.
    pub async fn serve_once<S>(&self, stream: S, kind: CodecKind) -> Result<(), RpcError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (mut reader, mut writer) = codec::server_pair(kind, read_half, write_half);

        let header = reader
            .read_request_header()
            .await?
            .ok_or(RpcError::ConnectionClosed)?;
        let body = reader.read_request_body().await?;
        let (response, body) =
            dispatch_one(&self.registry, header.service_method, header.seq, body).await;
        writer.write_response(&response, &body).await
    }
}

/// Runs one invocation on a blocking task and shapes the outcome into a
/// response envelope. Call-level failures become error envelopes, never a
/// dead connection.
async fn dispatch_one(
    registry: &Arc<Registry>,
    service_method: String,
    seq: u64,
    body: Value,
) -> (ResponseHeader, Value) {
    let started = Instant::now();
    let registry = Arc::clone(registry);
    let method = service_method.clone();
    let outcome = tokio::task::spawn_blocking(move || registry.dispatch(&method, body)).await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        // Panics are already absorbed inside `MethodDescriptor::invoke`;
        // a join error here means the task was cancelled at shutdown.
        Err(join_err) => Err(RpcError::handler(format!("invocation task failed: {join_err}"))),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let (response, body) = match outcome {
        Ok(reply) => (ResponseHeader::success(service_method, seq), reply),
        Err(err) => (
            ResponseHeader::failure(service_method, seq, err.wire_message()),
            Value::Null,
        ),
    };
    log_call_completion(&response, elapsed_ms);
    (response, body)
}

async fn write_response(
    writer: &Mutex<Box<dyn ServerCodecWriter>>,
    (response, body): (ResponseHeader, Value),
) {
    let mut writer = writer.lock().await;
    if let Err(err) = writer.write_response(&response, &body).await {
        // The connection is gone; the response is discarded.
        log::debug!(
            "discarding response service_method={} seq={}: {err}",
            response.service_method,
            response.seq
        );
    }
}

fn log_call_completion(response: &ResponseHeader, elapsed_ms: u64) {
    let payload = json!({
        "event": "rpc_call",
        "service_method": response.service_method,
        "seq": response.seq,
        "elapsed_ms": elapsed_ms,
        "ok": response.error.is_none(),
        "error": response.error,
    });
    log::info!("{payload}");
}
