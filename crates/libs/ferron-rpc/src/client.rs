//! Client runtime: issues calls, multiplexes concurrent callers over one
//! connection, and demultiplexes responses back to the caller that is
//! waiting on them.
//!
//! A single background reader task owns the codec read half. Callers hold
//! the write lock only long enough to take a sequence id, park their
//! pending call, and push their request frame; after that they block on
//! their own completion channel and never on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::{self, ClientCodecReader, ClientCodecWriter, CodecKind};
use crate::error::RpcError;
use crate::wire::RequestHeader;

type CompletionSender = oneshot::Sender<Result<Value, RpcError>>;

#[derive(Default)]
struct PendingState {
    calls: HashMap<u64, CompletionSender>,
    closed: Option<RpcError>,
}

struct Shared {
    pending: Mutex<PendingState>,
}

impl Shared {
    /// Terminal teardown. Idempotent: the first caller drains the map and
    /// every outstanding call receives `ConnectionClosed` exactly once;
    /// later calls find the map already closed and do nothing.
    fn fail(&self) {
        let drained = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            if pending.closed.is_some() {
                return;
            }
            pending.closed = Some(RpcError::ConnectionClosed);
            std::mem::take(&mut pending.calls)
        };
        for (_, sender) in drained {
            let _ = sender.send(Err(RpcError::ConnectionClosed));
        }
    }

    fn discard(&self, seq: u64) {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        pending.calls.remove(&seq);
    }
}

struct WriterState {
    codec: Box<dyn ClientCodecWriter>,
    next_seq: u64,
}

/// Handle to one in-flight call, returned by [`Client::go`].
pub struct CallHandle {
    service_method: String,
    seq: u64,
    rx: oneshot::Receiver<Result<Value, RpcError>>,
    shared: Arc<Shared>,
}

impl CallHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Waits for the correlated response and decodes the reply.
    pub async fn join<Rep>(self) -> Result<Rep, RpcError>
    where
        Rep: DeserializeOwned,
    {
        let value = self.rx.await.map_err(|_| RpcError::ConnectionClosed)??;
        serde_json::from_value(value)
            .map_err(|err| RpcError::handler(format!("undecodable reply: {err}")))
    }

    /// Abandons the call: its pending entry is removed and a late response
    /// for this sequence id will be read and dropped by the reader task.
    pub fn abandon(self) {
        self.shared.discard(self.seq);
    }
}

pub struct Client {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<WriterState>,
    reader_task: JoinHandle<()>,
}

impl Client {
    /// Connects over TCP and binds the chosen codec.
    pub async fn dial(addr: impl ToSocketAddrs, kind: CodecKind) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream, kind))
    }

    /// Binds the client to any established duplex stream. Must run inside
    /// a tokio runtime: construction spawns the background reader task.
    pub fn from_stream<S>(stream: S, kind: CodecKind) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (reader, writer) = codec::client_pair(kind, read_half, write_half);
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingState::default()),
        });
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&shared)));
        Self {
            shared,
            writer: tokio::sync::Mutex::new(WriterState {
                codec: writer,
                next_seq: 1,
            }),
            reader_task,
        }
    }

    /// Issues a call asynchronously and returns a handle to await it.
    pub async fn go(
        &self,
        service_method: &str,
        args: impl Serialize,
    ) -> Result<CallHandle, RpcError> {
        let params = serde_json::to_value(args)
            .map_err(|err| RpcError::handler(format!("unencodable request: {err}")))?;

        let mut writer = self.writer.lock().await;
        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut pending = self.shared.pending.lock().expect("pending lock poisoned");
            if let Some(err) = &pending.closed {
                return Err(err.clone());
            }
            let seq = writer.next_seq;
            writer.next_seq += 1;
            pending.calls.insert(seq, tx);
            seq
        };
        let header = RequestHeader {
            service_method: service_method.to_string(),
            seq,
        };
        if let Err(err) = writer.codec.write_request(&header, &params).await {
            // A write failure is terminal for the whole connection.
            self.shared.fail();
            return Err(err);
        }
        Ok(CallHandle {
            service_method: header.service_method,
            seq,
            rx,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Synchronous unary call: blocks the calling task until the matching
    /// response arrives or the connection dies.
    pub async fn call<Rep>(
        &self,
        service_method: &str,
        args: impl Serialize,
    ) -> Result<Rep, RpcError>
    where
        Rep: DeserializeOwned,
    {
        self.go(service_method, args).await?.join().await
    }

    /// Deadline wrapper: on expiry the call abandons its own pending entry
    /// and returns `Timeout` without touching sibling calls.
    pub async fn call_with_timeout<Rep>(
        &self,
        service_method: &str,
        args: impl Serialize,
        limit: Duration,
    ) -> Result<Rep, RpcError>
    where
        Rep: DeserializeOwned,
    {
        let handle = self.go(service_method, args).await?;
        let seq = handle.seq();
        match tokio::time::timeout(limit, handle.join()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.shared.discard(seq);
                Err(RpcError::Timeout {
                    service_method: service_method.to_string(),
                })
            }
        }
    }

    /// Tears the connection down: outstanding calls get `ConnectionClosed`
    /// exactly once and all later calls are rejected.
    pub fn close(&self) {
        self.reader_task.abort();
        self.shared.fail();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.shared.fail();
    }
}

/// The background reader. Exclusive owner of the read half: decodes one
/// response at a time, fulfills the matching pending call, and on any read
/// error fans `ConnectionClosed` out to every caller still waiting.
async fn read_loop(mut reader: Box<dyn ClientCodecReader>, shared: Arc<Shared>) {
    let terminal = loop {
        let header = match reader.read_response_header().await {
            Ok(header) => header,
            Err(err) => break err,
        };
        // The body is consumed unconditionally; skipping it would
        // desynchronize the stream for every later response.
        let body = match reader.read_response_body().await {
            Ok(body) => body,
            Err(err) => break err,
        };
        let sender = {
            let mut pending = shared.pending.lock().expect("pending lock poisoned");
            pending.calls.remove(&header.seq)
        };
        let Some(sender) = sender else {
            log::debug!("dropping response for unknown seq={}", header.seq);
            continue;
        };
        let outcome = match header.error {
            Some(message) => Err(RpcError::from_wire(&message)),
            None => Ok(body),
        };
        let _ = sender.send(outcome);
    };
    if !matches!(terminal, RpcError::ConnectionClosed) {
        log::warn!("rpc connection failed: {terminal}");
    }
    shared.fail();
}
