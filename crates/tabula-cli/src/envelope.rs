use serde::Serialize;
use serde_json::Value;
use tabula_warehouse::{ErrorCode, TabularError};
use uuid::Uuid;

/// Request identifier (UUID v4) echoed in every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Meta {
    pub request_id: RequestId,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeError {
    pub code: ErrorCode,
    pub message: String,
}

/// Output document: `ok` plus either `data` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
    pub meta: Meta,
}

impl Envelope {
    pub fn success(data: Value, latency_ms: u64, warnings: Vec<String>) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            meta: Meta {
                request_id: RequestId::new_v4(),
                latency_ms,
                warnings,
            },
        }
    }

    pub fn failure(error: &TabularError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(EnvelopeError {
                code: error.code(),
                message: error.message().to_string(),
            }),
            meta: Meta {
                request_id: RequestId::new_v4(),
                latency_ms: 0,
                warnings: Vec::new(),
            },
        }
    }
}
