use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid params for {method}: {source}")]
    InvalidParams {
        method: &'static str,
        source: serde_json::Error,
    },

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("frame is neither a request, a result nor an error")]
    Unrecognized,
}

/// Error codes the server attaches to `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerErrorCode {
    /// The login token is invalid or expired.
    Token,
    /// The credential pair was rejected.
    Credential,
    /// SDP handshake failed, usually a codec mismatch.
    Codec,
    Other(i64),
}

impl ServerErrorCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            -32000 => Self::Token,
            -32001 => Self::Credential,
            -32002 => Self::Codec,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Token => -32000,
            Self::Credential => -32001,
            Self::Codec => -32002,
            Self::Other(code) => *code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("server error {}: {message}", code.code())]
pub struct ServerError {
    pub code: ServerErrorCode,
    pub message: String,
}
