//! Convenient error handling

use crate::types::{Response, WSResult};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub type HassResult<T> = std::result::Result<T, HassError>;

/// The error enum for Hass
#[derive(Debug, Error)]
pub enum HassError {
    /// Returned when the gateway rejects the access token during the handshake
    #[error("authentication has failed: {0}")]
    AuthenticationFailed(String),

    /// Returned when the connection has unexpectedly failed
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// Returned when a command is issued while the session is not connected
    #[error("client is not connected")]
    NotConnected,

    /// Returned when a command did not receive its result within the deadline
    #[error("command timed out")]
    Timeout,

    /// Returned to pending callers when the session is explicitly closed
    #[error("command cancelled")]
    Cancelled,

    /// Returned when the gateway violates the expected frame exchange
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Returned when serde was unable to deserialize the values
    #[error("unable to deserialize the received value: {0}")]
    UnableToDeserialize(#[from] serde_json::Error),

    /// Tungstenite error
    #[error("websocket error: {0}")]
    TungsteniteError(tungstenite::Error),

    /// Returned when the gateway answers a command with success == false
    #[error("the gateway rejected the command: {}", .0.error_message())]
    ResponseError(WSResult),

    /// Returned when an unexpected message format is received
    #[error("unexpected payload received: {0:?}")]
    UnknownPayloadReceived(Response),

    /// Returned for errors which do not fit any of the above criterias
    #[error("{0}")]
    Generic(String),
}

impl From<tungstenite::Error> for HassError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                HassError::ConnectionClosed
            }
            _ => HassError::TungsteniteError(error),
        }
    }
}
