//! Typed call wrappers for the built-in services.
//!
//! Callers that know the service they are talking to can use these instead
//! of spelling out `"Service.Method"` names and JSON payloads at every call
//! site; the wrapper pins the request and reply types once.

use ferron_rpc::{Client, CodecKind, RpcError};
use tokio::net::ToSocketAddrs;

use crate::service::ArithArgs;

pub struct HelloClient {
    inner: Client,
}

impl HelloClient {
    pub fn new(inner: Client) -> Self {
        Self { inner }
    }

    pub async fn dial(addr: impl ToSocketAddrs, kind: CodecKind) -> Result<Self, RpcError> {
        Ok(Self::new(Client::dial(addr, kind).await?))
    }

    pub async fn hello(&self, name: &str) -> Result<String, RpcError> {
        self.inner.call("Hello.Hello", name).await
    }
}

pub struct ArithClient {
    inner: Client,
}

impl ArithClient {
    pub fn new(inner: Client) -> Self {
        Self { inner }
    }

    pub async fn dial(addr: impl ToSocketAddrs, kind: CodecKind) -> Result<Self, RpcError> {
        Ok(Self::new(Client::dial(addr, kind).await?))
    }

    pub async fn add(&self, a: i64, b: i64) -> Result<i64, RpcError> {
        self.inner.call("Arith.Add", ArithArgs { a, b }).await
    }

    pub async fn div(&self, a: i64, b: i64) -> Result<i64, RpcError> {
        self.inner.call("Arith.Div", ArithArgs { a, b }).await
    }
}
