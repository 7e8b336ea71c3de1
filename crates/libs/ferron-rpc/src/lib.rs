//! Minimal unary RPC runtime.
//!
//! A caller invokes a named `"Service.Method"` on a remote process as if it
//! were local, over a pluggable wire format, with any number of in-flight
//! calls multiplexed on one connection. The crate provides:
//!
//! - **[`Registry`]** — case-sensitive name-to-handler dispatch with
//!   registration-time shape validation and a panic fault boundary
//! - **Codecs** — a dense length-prefixed binary codec and a textual,
//!   JSON-RPC-shaped line codec, both behind split header/body traits
//! - **[`Server`]** — per-connection dispatch loop with pipelined
//!   concurrent invocations and serialized response writes
//! - **[`Client`]** — synchronous [`Client::call`] and asynchronous
//!   [`Client::go`], correlated by per-connection sequence id
//! - **Transports** — long-lived TCP streams, plus a one-call-per-exchange
//!   HTTP adapter in [`http`]
//!
//! Streaming calls, code generation, and authentication are out of scope.

pub mod client;
pub mod codec;
pub mod error;
pub mod http;
pub mod registry;
pub mod server;
pub mod wire;

pub use client::{CallHandle, Client};
pub use codec::CodecKind;
pub use error::RpcError;
pub use registry::{MethodDescriptor, Registry, ServiceHandler};
pub use server::Server;
pub use wire::{RequestHeader, ResponseHeader};
