use crate::types::HassEntity;
use serde::Deserialize;

///	This object represents the Home Assistant Event
///
/// received when the client is subscribed to
/// [Subscribe to events](https://developers.home-assistant.io/docs/api/websocket/#subscribe-to-events)
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct HassEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: EventData,
    pub origin: String,
    pub time_fired: String,
    pub context: Context,
}

///	This is part of HassEvent
///
/// the fields are optional since only state_changed events carry all of them
#[derive(Debug, Deserialize, PartialEq, Clone, Default)]
pub struct EventData {
    pub entity_id: Option<String>,
    pub new_state: Option<HassEntity>,
    pub old_state: Option<HassEntity>,
}

/// General construct used by HassEntity and HassEvent
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Context {
    pub id: String,
    pub parent_id: Option<String>,
    pub user_id: Option<String>,
}
