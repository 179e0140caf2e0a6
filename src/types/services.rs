use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

//This is the HassService
#[derive(Debug, Deserialize, PartialEq)]
pub struct HassServices(pub HashMap<String, HashMap<String, HassService>>);

#[derive(Debug, Deserialize, PartialEq)]
pub struct HassService {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: HashMap<String, Field>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Field {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub example: Value,
}
