use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// How messages travel over one websocket: bincode in binary frames, or JSON
/// in text frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Bincode,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

impl WireFormat {
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Frame, CodecError> {
        match self {
            WireFormat::Bincode => Ok(Frame::Binary(bincode::serialize(value)?)),
            WireFormat::Json => Ok(Frame::Text(serde_json::to_string(value)?)),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            WireFormat::Bincode => Ok(bincode::deserialize(bytes)?),
            WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}
