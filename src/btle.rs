//! [`Scanner`] and [`GattLink`] on top of the host Bluetooth stack via `btleplug`.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::{
  api::{Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter, Service},
  platform::{Adapter, Manager as BtleManager, Peripheral},
};
use futures::StreamExt;
use uuid::Uuid;

use crate::{
  explore::{connect_within, CharacteristicInfo, GattConnection, GattLink, ServiceInfo},
  registry::{normalize_id, AdvertisementSighting, PeripheralRecord},
  scan::{ScanParams, Scanner, SightingStream},
  Error, Result,
};

/// HCI "RSSI not available".
const RSSI_UNAVAILABLE: i16 = 127;

pub struct BtleplugBackend {
  adapter: Adapter,
}

impl BtleplugBackend {
  pub async fn new(adapter_index: usize) -> Result<Self> {
    let manager = BtleManager::new().await?;
    let mut adapters = manager.adapters().await?;
    if adapters.is_empty() {
      return Err(Error::NoAdapter);
    }
    if adapter_index >= adapters.len() {
      return Err(Error::AdapterNotFound(adapter_index));
    }
    let adapter = adapters.swap_remove(adapter_index);
    log::info!(
      "Bluetooth adapter ready | index={} | info={}",
      adapter_index,
      adapter.adapter_info().await.unwrap_or_default()
    );
    Ok(Self { adapter })
  }

  async fn find_peripheral(&self, peripheral_id: &str) -> Result<Peripheral> {
    for peripheral in self.adapter.peripherals().await? {
      if normalize_id(&peripheral.address().to_string()) == peripheral_id {
        return Ok(peripheral);
      }
    }
    Err(Error::DeviceNotFound(peripheral_id.to_string()))
  }
}

#[async_trait]
impl Scanner for BtleplugBackend {
  async fn start(&self, params: &ScanParams) -> Result<SightingStream> {
    log::debug!(
      "Host stack picks scan timing | interval_us={} | window_us={} | active={}",
      params.interval.as_micros(),
      params.window.as_micros(),
      params.active
    );
    let events = self.adapter.events().await?;
    self.adapter.start_scan(ScanFilter::default()).await?;

    let adapter = self.adapter.clone();
    let sightings = events.filter_map(move |event| {
      let adapter = adapter.clone();
      async move { sighting_for(&adapter, event).await }
    });
    Ok(sightings.boxed())
  }

  async fn stop(&self) -> Result<()> {
    self.adapter.stop_scan().await?;
    Ok(())
  }
}

async fn sighting_for(adapter: &Adapter, event: CentralEvent) -> Option<AdvertisementSighting> {
  let id = match event {
    CentralEvent::DeviceDiscovered(id)
    | CentralEvent::DeviceUpdated(id)
    | CentralEvent::ManufacturerDataAdvertisement { id, .. }
    | CentralEvent::ServicesAdvertisement { id, .. } => id,
    _ => return None,
  };
  let peripheral = adapter.peripheral(&id).await.ok()?;
  match peripheral.properties().await {
    Ok(properties) => properties.as_ref().map(sighting_from_properties),
    Err(err) => {
      log::debug!("Skipping advertisement without properties | err={err}");
      None
    }
  }
}

fn sighting_from_properties(properties: &PeripheralProperties) -> AdvertisementSighting {
  let mut companies: Vec<_> = properties.manufacturer_data.iter().collect();
  companies.sort_by_key(|(company, _)| **company);
  AdvertisementSighting {
    address: properties.address.to_string(),
    local_name: properties.local_name.clone().unwrap_or_default(),
    rssi: properties.rssi.unwrap_or(RSSI_UNAVAILABLE),
    // not surfaced by btleplug; the host stack rejects the connect instead
    connectable: true,
    service_uuids: properties.services.clone(),
    manufacturer_data: companies
      .into_iter()
      .map(|(company, data)| {
        let mut field = company.to_le_bytes().to_vec();
        field.extend_from_slice(data);
        field
      })
      .collect(),
  }
}

#[async_trait]
impl GattLink for BtleplugBackend {
  async fn connect(&self, peripheral: &PeripheralRecord, timeout: Duration) -> Result<Box<dyn GattConnection>> {
    let device = self.find_peripheral(&peripheral.id).await?;
    let connecting = async {
      if !device.is_connected().await.unwrap_or(false) {
        device.connect().await?;
      }
      Ok::<_, Error>(())
    };
    // the host stack keeps connecting after the future is dropped
    let release = async {
      log::info!("Releasing timed out connect | peripheral_id={}", peripheral.id);
      device.disconnect().await?;
      Ok::<_, Error>(())
    };
    connect_within(timeout, connecting, release).await?;
    log::info!("Connected | peripheral_id={} | address={}", peripheral.id, peripheral.address);
    Ok(Box::new(BtleConnection {
      device_id: peripheral.id.clone(),
      peripheral: device,
      layout: None,
    }))
  }
}

struct BtleConnection {
  device_id: String,
  peripheral: Peripheral,
  layout: Option<Vec<ServiceLayout>>,
}

#[async_trait]
impl GattConnection for BtleConnection {
  async fn services(&mut self) -> Result<Vec<ServiceInfo>> {
    if self.layout.is_none() {
      self.peripheral.discover_services().await?;
      let shapes: Vec<ServiceShape> = self.peripheral.services().iter().map(ServiceShape::from).collect();
      self.layout = Some(assign_handles(&shapes));
    }
    Ok(self.layout.iter().flatten().map(|entry| entry.info.clone()).collect())
  }

  async fn characteristics(&mut self, service: &ServiceInfo) -> Result<Vec<CharacteristicInfo>> {
    self
      .layout
      .iter()
      .flatten()
      .find(|entry| entry.info == *service)
      .map(|entry| entry.characteristics.clone())
      .ok_or_else(|| Error::ServiceNotFound {
        device_id: self.device_id.clone(),
        service_uuid: service.uuid.to_string(),
      })
  }

  async fn close(&mut self) -> Result<()> {
    self.peripheral.disconnect().await?;
    Ok(())
  }
}

struct ServiceShape {
  uuid: Uuid,
  characteristics: Vec<CharacteristicShape>,
}

struct CharacteristicShape {
  uuid: Uuid,
  properties: u16,
  descriptors: usize,
}

impl From<&Service> for ServiceShape {
  fn from(service: &Service) -> Self {
    Self {
      uuid: service.uuid,
      characteristics: service
        .characteristics
        .iter()
        .map(|characteristic| CharacteristicShape {
          uuid: characteristic.uuid,
          properties: u16::from(characteristic.properties.bits()),
          descriptors: characteristic.descriptors.len(),
        })
        .collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ServiceLayout {
  info: ServiceInfo,
  characteristics: Vec<CharacteristicInfo>,
}

/// Host stacks hide attribute handles, so number the tree the way a GATT
/// server lays it out: service declaration, then per characteristic its
/// declaration, value and descriptors.
fn assign_handles(shapes: &[ServiceShape]) -> Vec<ServiceLayout> {
  let mut next: u16 = 1;
  shapes
    .iter()
    .map(|shape| {
      let start_handle = next;
      next = next.saturating_add(1);
      let characteristics = shape
        .characteristics
        .iter()
        .map(|characteristic| {
          let value_handle = next.saturating_add(1);
          let end_handle = value_handle.saturating_add(characteristic.descriptors as u16);
          next = end_handle.saturating_add(1);
          CharacteristicInfo {
            value_handle,
            end_handle,
            uuid: characteristic.uuid,
            properties: characteristic.properties,
          }
        })
        .collect();
      ServiceLayout {
        info: ServiceInfo {
          start_handle,
          end_handle: next.saturating_sub(1).max(start_handle),
          uuid: shape.uuid,
        },
        characteristics,
      }
    })
    .collect()
}
