use serde::Serialize;
use serde_json::{Map, Value};

/// This enum defines the type of commands that the client is allowed to send to the Websocket server
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum Command {
    AuthInit(Auth),
    Ping(Ask),
    SubscribeEvent(Subscribe),
    Unsubscribe(Unsubscribe),
    GetConfig(Ask),
    GetStates(Ask),
    GetServices(Ask),
    CallService(CallService),
    Custom(Request),
}

impl Command {
    /// the sequence assigned by the correlator, None only for the auth exchange
    pub(crate) fn id(&self) -> Option<u64> {
        match self {
            Command::AuthInit(_) => None,
            Command::Ping(ask) | Command::GetConfig(ask) | Command::GetStates(ask)
            | Command::GetServices(ask) => Some(ask.id),
            Command::SubscribeEvent(subscribe) => Some(subscribe.id),
            Command::Unsubscribe(unsubscribe) => Some(unsubscribe.id),
            Command::CallService(call_service) => Some(call_service.id),
            Command::Custom(request) => Some(request.id),
        }
    }
}

//used to authenticate the session
#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct Auth {
    #[serde(rename = "type")]
    pub(crate) msg_type: String,
    pub(crate) access_token: String,
}

//used to fetch from server
#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct Ask {
    pub(crate) id: u64,
    #[serde(rename = "type")]
    pub(crate) msg_type: String,
}

//used for Event subscribtion
#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct Subscribe {
    pub(crate) id: u64,
    #[serde(rename = "type")]
    pub(crate) msg_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) event_type: Option<String>,
}

//used for Event Unsubscribe
#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct Unsubscribe {
    pub(crate) id: u64,
    #[serde(rename = "type")]
    pub(crate) msg_type: String,
    pub(crate) subscription: u64,
}

//used to call a service
#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct CallService {
    pub(crate) id: u64,
    #[serde(rename = "type")]
    pub(crate) msg_type: String,
    pub(crate) domain: String,
    pub(crate) service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) service_data: Option<Value>,
}

//used for any command type the client does not model explicitly,
//the payload fields are flattened next to "id" and "type"
#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct Request {
    pub(crate) id: u64,
    #[serde(rename = "type")]
    pub(crate) msg_type: String,
    #[serde(flatten)]
    pub(crate) payload: Map<String, Value>,
}
