//! # Async HomeAssistant Websocket Library
//!
//! A client for the HomeAssistant websocket api based on
//! <https://developers.home-assistant.io/docs/api/websocket> specifications.
//!
//! The crate keeps one persistent, authenticated websocket session per
//! [`HassClient`]. Outgoing commands get a monotonically increasing sequence
//! and suspend their caller until the matching result frame arrives, event
//! subscriptions fan incoming event frames out to registered callbacks, and
//! a lost connection is re-established with jittered exponential backoff
//! when a [`ReconnectOptions`] policy is configured.

mod client;
mod codec;
mod correlator;
mod errors;
mod session;
mod subscriptions;
pub mod types;

pub use client::HassClient;
pub use errors::{HassError, HassResult};
pub use session::SessionState;
pub use subscriptions::{EventFilter, SubscriptionHandle};
pub use types::{ClientConfig, ReconnectOptions, WSEvent};
