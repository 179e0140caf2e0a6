//! Home Assistant client implementation

use crate::errors::{HassError, HassResult};
use crate::session::{Session, SessionState};
use crate::subscriptions::{EventFilter, SubscriptionHandle};
use crate::types::{
    Ask, CallService, ClientConfig, Command, HassConfig, HassEntity, HassServices, Request,
    Response, WSEvent,
};

use log::debug;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// HassClient is a library that is meant to simplify the conversation with
/// the HomeAssistant Websocket Server. It owns one persistent session and
/// provides convenient functions that create the requests and read the
/// messages from the server.
pub struct HassClient {
    session: Arc<Session>,
}

impl HassClient {
    /// Create a new client, no connection is opened yet
    pub fn new(config: ClientConfig) -> Self {
        HassClient {
            session: Session::new(config),
        }
    }

    /// Open the websocket connection and authenticate the session with the
    /// configured long-lived access token.
    ///
    /// When a client connects to the server, the server sends out auth_required.
    /// The first message from the client should be an auth message. If the
    /// client supplies valid authentication the phase completes with auth_ok,
    /// otherwise the server replies auth_invalid and disconnects the session.
    pub async fn connect(&self) -> HassResult<()> {
        self.session.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Close the session. Pending commands are failed with a cancellation
    /// error and no reconnection is attempted.
    pub fn close(&self) {
        self.session.close();
    }

    /// Send an arbitrary command and wait for its result payload with the
    /// configured default deadline.
    ///
    /// The payload must be a JSON object (or Null), its fields are placed
    /// next to "id" and "type" in the outgoing frame. The envelope owns
    /// those two keys, so payload entries named "id" or "type" are dropped.
    pub async fn call(&self, command_type: &str, payload: Value) -> HassResult<Value> {
        let timeout = self.session.config().call_timeout;
        self.call_with_timeout(command_type, payload, timeout).await
    }

    /// Same as [`HassClient::call`] with an explicit per-call deadline. A
    /// deadline that has already passed resolves with a timeout error.
    pub async fn call_with_timeout(
        &self,
        command_type: &str,
        payload: Value,
        timeout: Duration,
    ) -> HassResult<Value> {
        let mut payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(HassError::Generic(
                    "the call payload must be a JSON object".to_owned(),
                ))
            }
        };
        // the payload flattens into the frame, these keys belong to the
        // envelope and must not appear twice
        if payload.remove("id").is_some() || payload.remove("type").is_some() {
            debug!("discarded reserved id/type keys from a {} payload", command_type);
        }
        let cmd = Command::Custom(Request {
            id: self.session.next_id(),
            msg_type: command_type.to_owned(),
            payload,
        });
        match self.session.command_with_timeout(cmd, timeout).await? {
            Response::Result(result) => result.result(),
            unknown => Err(HassError::UnknownPayloadReceived(unknown)),
        }
    }

    /// The API supports receiving a ping from the client and returning a pong.
    /// This serves as a heartbeat to ensure the connection is still alive.
    pub async fn ping(&self) -> HassResult<()> {
        let ping_req = Command::Ping(Ask {
            id: self.session.next_id(),
            msg_type: "ping".to_owned(),
        });
        match self.session.command(ping_req).await? {
            Response::Pong(_) => Ok(()),
            Response::Result(err) => Err(HassError::ResponseError(err)),
            unknown => Err(HassError::UnknownPayloadReceived(unknown)),
        }
    }

    /// This will get the current config of the Home Assistant instance.
    pub async fn get_config(&self) -> HassResult<HassConfig> {
        let config_req = Command::GetConfig(Ask {
            id: self.session.next_id(),
            msg_type: "get_config".to_owned(),
        });
        match self.session.command(config_req).await? {
            Response::Result(data) => {
                let value = data.result()?;
                let config: HassConfig = serde_json::from_value(value)?;
                Ok(config)
            }
            unknown => Err(HassError::UnknownPayloadReceived(unknown)),
        }
    }

    /// This will get all the current states from Home Assistant.
    pub async fn get_states(&self) -> HassResult<Vec<HassEntity>> {
        let states_req = Command::GetStates(Ask {
            id: self.session.next_id(),
            msg_type: "get_states".to_owned(),
        });
        match self.session.command(states_req).await? {
            Response::Result(data) => {
                let value = data.result()?;
                let states: Vec<HassEntity> = serde_json::from_value(value)?;
                Ok(states)
            }
            unknown => Err(HassError::UnknownPayloadReceived(unknown)),
        }
    }

    /// This will get all the services from Home Assistant.
    pub async fn get_services(&self) -> HassResult<HassServices> {
        let services_req = Command::GetServices(Ask {
            id: self.session.next_id(),
            msg_type: "get_services".to_owned(),
        });
        match self.session.command(services_req).await? {
            Response::Result(data) => {
                let value = data.result()?;
                let services: HassServices = serde_json::from_value(value)?;
                Ok(services)
            }
            unknown => Err(HassError::UnknownPayloadReceived(unknown)),
        }
    }

    /// This will call a service in Home Assistant.
    ///
    /// The client can listen to state_changed events if it is interested in
    /// changed entities as a result of a service call.
    /// <https://developers.home-assistant.io/docs/api/websocket#calling-a-service>
    pub async fn call_service(
        &self,
        domain: String,
        service: String,
        service_data: Option<Value>,
    ) -> HassResult<()> {
        let service_req = Command::CallService(CallService {
            id: self.session.next_id(),
            msg_type: "call_service".to_owned(),
            domain,
            service,
            service_data,
        });
        match self.session.command(service_req).await? {
            Response::Result(data) => {
                data.result()?;
                Ok(())
            }
            unknown => Err(HassError::UnknownPayloadReceived(unknown)),
        }
    }

    /// Subscribe the client to the event bus. Only events accepted by the
    /// filter are delivered to the callback.
    ///
    /// The returned handle stays valid across reconnections: the session
    /// replays the subscription with a fresh wire id and the callback keeps
    /// firing without any action from the caller.
    pub async fn subscribe<F>(
        &self,
        filter: EventFilter,
        callback: F,
    ) -> HassResult<SubscriptionHandle>
    where
        F: Fn(WSEvent) + Send + Sync + 'static,
    {
        self.session.subscribe(filter, Arc::new(callback)).await
    }

    /// Shorthand for subscribing to a single event type
    pub async fn subscribe_event<F>(
        &self,
        event_type: &str,
        callback: F,
    ) -> HassResult<SubscriptionHandle>
    where
        F: Fn(WSEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventFilter::for_event_type(event_type), callback)
            .await
    }

    /// Remove a subscription. Unsubscribing a handle twice is a no-op the
    /// second time.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> HassResult<()> {
        self.session.unsubscribe(handle).await
    }
}
