use serde::{Deserialize, Serialize};

use crate::codec::PrettyUuid;
use crate::{Error, Result};

/// Inbound controller command, selected by the `action` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  StartScanning,
  StopScanning,
  Explore { peripheral_id: String },
  Unsupported(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommand {
  action: String,
  #[serde(default)]
  peripheral_id: Option<String>,
}

impl Command {
  pub fn parse(text: &str) -> Result<Self> {
    let raw: RawCommand = serde_json::from_str(text)?;
    match raw.action.as_str() {
      "startScanning" => Ok(Command::StartScanning),
      "stopScanning" => Ok(Command::StopScanning),
      "explore" => raw
        .peripheral_id
        .map(|peripheral_id| Command::Explore { peripheral_id })
        .ok_or_else(|| Error::InvalidRequest("explore: missing peripheralId".into())),
      _ => Ok(Command::Unsupported(raw.action)),
    }
  }
}

/// Outbound event, tagged by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
  StateChange { state: AdapterState },
  StartScanning,
  StopScanning,
  Discover(Discovery),
  Explore(Exploration),
  Error { message: String },
}

impl Event {
  pub fn error(message: impl Into<String>) -> Self {
    Event::Error {
      message: message.into(),
    }
  }

  pub fn not_implemented(action: &str) -> Self {
    Event::error(format!("{action}: not implemented"))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AdapterState {
  PoweredOn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
  pub peripheral_id: String,
  pub name: String,
  pub rssi: i16,
  pub address: String,
  pub connectable: bool,
  pub advertisement: Advertisement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
  pub local_name: String,
  pub service_uuids: Vec<PrettyUuid>,
  /// hex encoded manufacturer-specific data
  pub manufacturer_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExploreState {
  Missing,
  Start,
  Failed,
  Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exploration {
  pub peripheral_id: String,
  pub state: ExploreState,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub services_json_data: Option<Vec<ServiceJson>>,
}

impl Exploration {
  pub fn new(peripheral_id: &str, state: ExploreState) -> Self {
    Self {
      peripheral_id: peripheral_id.to_string(),
      state,
      error: None,
      services_json_data: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceJson {
  pub start_handle: u16,
  pub end_handle: u16,
  pub uuid: PrettyUuid,
  pub characteristics: Vec<CharacteristicJson>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacteristicJson {
  pub value_handle: u16,
  pub end_handle: u16,
  pub uuid: PrettyUuid,
  pub properties: Vec<&'static str>,
}
