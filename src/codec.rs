//! Wire codec for the websocket frames
//!
//! One JSON text frame per logical message. Outgoing commands already carry
//! the sequence assigned by the correlator; incoming frames are tagged by
//! their "type" field and anything unrecognizable decodes to
//! [`Response::Malformed`] instead of failing the session.

use crate::errors::HassResult;
use crate::types::{Command, Response};

use tokio_tungstenite::tungstenite::Message;

pub(crate) fn encode(cmd: &Command) -> HassResult<Message> {
    let payload = serde_json::to_string(cmd)?;
    Ok(Message::text(payload))
}

pub(crate) fn decode(frame: &str) -> Response {
    serde_json::from_str::<Response>(frame)
        .unwrap_or_else(|err| Response::Malformed(err.to_string()))
}
