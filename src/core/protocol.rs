// src/core/protocol.rs

//! Wire framing for the control socket: length-delimited JSON envelopes.
//! One request frame carries a method name and one argument blob; one
//! response frame carries either the result or a `(kind, message)` error.

use crate::core::errors::{ErrorKind, FlywallError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::LengthDelimitedCodec;

/// Frames are capped generously; `stage_binary` ships whole binaries.
pub const MAX_FRAME_LENGTH: usize = 128 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl ResponseEnvelope {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: &FlywallError) -> Self {
        Self {
            id,
            result: None,
            error: Some(WireError {
                kind: error.kind(),
                message: error.to_string(),
            }),
        }
    }

    pub fn into_result(self) -> Result<Value, FlywallError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(FlywallError::from_wire(error.kind, error.message)),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// The codec both ends of the socket share.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}
