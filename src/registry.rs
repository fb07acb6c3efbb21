use std::collections::HashMap;

use uuid::Uuid;

/// One advertisement report as delivered by a [`Scanner`](crate::Scanner).
///
/// Reports are frequently partial: the local name or service list of a
/// peripheral may only show up in some of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementSighting {
  pub address: String,
  pub local_name: String,
  pub rssi: i16,
  pub connectable: bool,
  pub service_uuids: Vec<Uuid>,
  /// Raw manufacturer-specific AD fields, company id included.
  pub manufacturer_data: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralRecord {
  pub id: String,
  pub address: String,
  pub display_name: String,
  pub rssi: i16,
  pub connectable: bool,
}

impl PeripheralRecord {
  fn from_sighting(id: String, sighting: &AdvertisementSighting) -> Self {
    let display_name = if sighting.local_name.is_empty() {
      id.clone()
    } else {
      sighting.local_name.clone()
    };
    Self {
      id,
      address: sighting.address.clone(),
      display_name,
      rssi: sighting.rssi,
      connectable: sighting.connectable,
    }
  }

  /// Takes `name` only while the current name is still an address placeholder.
  fn refine_name(&mut self, name: &str) {
    if !name.is_empty() && self.display_name != name && looks_like_address(&self.display_name) {
      self.display_name = name.to_string();
    }
  }
}

/// Stable peripheral key: the radio address without separators, lowercased.
pub fn normalize_id(address: &str) -> String {
  address
    .chars()
    .filter(|c| *c != ':' && *c != '-')
    .map(|c| c.to_ascii_lowercase())
    .collect()
}

fn looks_like_address(name: &str) -> bool {
  name.len() == 12 && name.chars().all(|c| c.is_ascii_hexdigit())
}

/// Every peripheral sighted since the bridge started, keyed by normalized id.
#[derive(Debug, Default)]
pub struct PeripheralRegistry {
  peripherals: HashMap<String, PeripheralRecord>,
}

impl PeripheralRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Merges a sighting into the record for its address and returns the result.
  pub fn upsert(&mut self, sighting: &AdvertisementSighting) -> PeripheralRecord {
    let id = normalize_id(&sighting.address);
    let record = self
      .peripherals
      .entry(id)
      .and_modify(|record| {
        record.refine_name(&sighting.local_name);
        record.rssi = sighting.rssi;
        record.connectable = sighting.connectable;
      })
      .or_insert_with_key(|id| PeripheralRecord::from_sighting(id.clone(), sighting));
    record.clone()
  }

  pub fn lookup(&self, id: &str) -> Option<&PeripheralRecord> {
    self.peripherals.get(id)
  }

  pub fn len(&self) -> usize {
    self.peripherals.len()
  }

  pub fn is_empty(&self) -> bool {
    self.peripherals.is_empty()
  }
}
