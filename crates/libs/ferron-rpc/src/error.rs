use std::io;

/// Errors produced by the RPC runtime.
///
/// Variants split into two severities: call-level errors resolve a single
/// call and leave the connection alive, connection-level errors tear the
/// whole connection down and fan out to every outstanding call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RpcError {
    #[error("registration rejected: {reason}")]
    Registration { reason: String },

    #[error("no such method: {service_method}")]
    NotFound { service_method: String },

    #[error("handler failed: {message}")]
    Handler { message: String },

    #[error("framing error: {message}")]
    Framing { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("call timed out: {service_method}")]
    Timeout { service_method: String },
}

impl RpcError {
    /// Returns `true` for errors that terminate the connection rather than
    /// a single call.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Framing { .. } | Self::Transport { .. } | Self::ConnectionClosed
        )
    }

    pub fn registration(reason: impl Into<String>) -> Self {
        Self::Registration {
            reason: reason.into(),
        }
    }

    pub fn not_found(service_method: impl Into<String>) -> Self {
        Self::NotFound {
            service_method: service_method.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    /// Rebuilds a typed error from the error string a server put on the
    /// wire. The `NotFound` display prefix is the only one recovered; any
    /// other string is a handler failure as far as the caller can tell.
    pub fn from_wire(message: &str) -> Self {
        match message.strip_prefix("no such method: ") {
            Some(service_method) => Self::not_found(service_method),
            None => Self::handler(message),
        }
    }

    /// The string placed in a response envelope's error field. A handler
    /// failure travels as the bare message the handler produced, so it
    /// survives a round trip through [`Self::from_wire`] unchanged.
    pub fn wire_message(&self) -> String {
        match self {
            Self::Handler { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<io::Error> for RpcError {
    fn from(err: io::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}
