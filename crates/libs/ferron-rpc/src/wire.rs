//! Envelope types shared by every codec.

/// Header of an outbound call. `seq` is chosen by the client and must be
/// unique among the calls outstanding on its connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    pub service_method: String,
    pub seq: u64,
}

/// Header of a reply. `seq` echoes the request it answers; a populated
/// `error` means the body is null and the call failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    pub service_method: String,
    pub seq: u64,
    pub error: Option<String>,
}

impl ResponseHeader {
    pub fn success(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: None,
        }
    }

    pub fn failure(service_method: impl Into<String>, seq: u64, error: impl Into<String>) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: Some(error.into()),
        }
    }
}
