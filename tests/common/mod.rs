#![allow(dead_code)]

use std::{
  collections::VecDeque,
  future::Future,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
  },
  time::Duration,
};

use async_trait::async_trait;
use futures::{
  channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
  StreamExt,
};
use tokio::{sync::mpsc, time::timeout};
use uuid::Uuid;
use web_bluetooth_bridge::{
  codec::{FLAG_NOTIFY, FLAG_READ, FLAG_WRITE, FLAG_WRITE_NO_RESPONSE},
  connect_within, AdvertisementSighting, BridgeConfig, BridgeSession, CharacteristicInfo, Error, Event, ExploreTimeouts,
  GattConnection, GattLink, PeripheralRecord, PeripheralRegistry, Result, ScanCancel, ScanParams, Scanner,
  ServiceInfo, ServiceUuidPolicy, SightingStream,
};

const WAIT: Duration = Duration::from_secs(2);

pub fn uuid16(short: u16) -> Uuid {
  Uuid::from_u128(((short as u128) << 96) | 0x0000_1000_8000_00805f9b34fb)
}

pub fn nus(suffix: u16) -> Uuid {
  Uuid::from_u128(0x6e400000_b5a3_f393_e0a9_e50e24dcca9e | ((suffix as u128) << 96))
}

pub fn sighting(address: &str, name: &str, rssi: i16, services: Vec<Uuid>) -> AdvertisementSighting {
  AdvertisementSighting {
    address: address.into(),
    local_name: name.into(),
    rssi,
    connectable: true,
    service_uuids: services,
    manufacturer_data: Vec::new(),
  }
}

pub fn test_config() -> BridgeConfig {
  BridgeConfig {
    scan: ScanParams {
      duration: Duration::from_secs(2),
      ..ScanParams::default()
    },
    service_policy: ServiceUuidPolicy::ForwardAll,
    timeouts: ExploreTimeouts {
      connect: Duration::from_millis(50),
      discovery: Duration::from_millis(50),
    },
  }
}

/// Battery service with a read/notify level, plus a Nordic UART service.
pub fn battery_tree() -> Vec<(ServiceInfo, Vec<CharacteristicInfo>)> {
  vec![
    (
      ServiceInfo {
        start_handle: 1,
        end_handle: 4,
        uuid: uuid16(0x180f),
      },
      vec![CharacteristicInfo {
        value_handle: 3,
        end_handle: 4,
        uuid: uuid16(0x2a19),
        properties: FLAG_READ | FLAG_NOTIFY,
      }],
    ),
    (
      ServiceInfo {
        start_handle: 5,
        end_handle: 10,
        uuid: nus(1),
      },
      vec![
        CharacteristicInfo {
          value_handle: 7,
          end_handle: 7,
          uuid: nus(2),
          properties: FLAG_WRITE | FLAG_WRITE_NO_RESPONSE,
        },
        CharacteristicInfo {
          value_handle: 9,
          end_handle: 10,
          uuid: nus(3),
          properties: FLAG_NOTIFY,
        },
      ],
    ),
  ]
}

/// Scanner fed by the test. Each `start` consumes the next queued run.
#[derive(Default)]
pub struct MockScanner {
  runs: Mutex<VecDeque<UnboundedReceiver<AdvertisementSighting>>>,
  starts: AtomicUsize,
  stops: AtomicUsize,
}

impl MockScanner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Queues a run whose sightings the test pushes while it is live.
  pub fn open_run(&self) -> UnboundedSender<AdvertisementSighting> {
    let (tx, rx) = unbounded();
    self.runs.lock().unwrap().push_back(rx);
    tx
  }

  /// Queues a run that delivers `sightings` and then ends.
  pub fn push_run(&self, sightings: Vec<AdvertisementSighting>) {
    let tx = self.open_run();
    for sighting in sightings {
      tx.unbounded_send(sighting).unwrap();
    }
  }

  pub fn starts(&self) -> usize {
    self.starts.load(Ordering::SeqCst)
  }

  pub fn stops(&self) -> usize {
    self.stops.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Scanner for MockScanner {
  async fn start(&self, _params: &ScanParams) -> Result<SightingStream> {
    self.starts.fetch_add(1, Ordering::SeqCst);
    let run = self
      .runs
      .lock()
      .unwrap()
      .pop_front()
      .ok_or_else(|| Error::InvalidRequest("radio busy".into()))?;
    Ok(run.boxed())
  }

  async fn stop(&self) -> Result<()> {
    self.stops.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
  Healthy,
  Refuse,
  /// Connect never completes on its own.
  Hang,
  /// Service discovery never completes.
  HangServices,
  BrokenCharacteristics,
}

/// GATT link serving a fixed tree and recording every call it receives.
pub struct MockLink {
  tree: Vec<(ServiceInfo, Vec<CharacteristicInfo>)>,
  mode: LinkMode,
  calls: Arc<Mutex<Vec<String>>>,
}

impl MockLink {
  pub fn new(tree: Vec<(ServiceInfo, Vec<CharacteristicInfo>)>) -> Self {
    Self {
      tree,
      mode: LinkMode::Healthy,
      calls: Arc::default(),
    }
  }

  pub fn with_mode(mut self, mode: LinkMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl GattLink for MockLink {
  async fn connect(&self, peripheral: &PeripheralRecord, timeout: Duration) -> Result<Box<dyn GattConnection>> {
    self.calls.lock().unwrap().push(format!("connect {}", peripheral.id));
    match self.mode {
      LinkMode::Refuse => Err(Error::DeviceNotFound(peripheral.id.clone())),
      LinkMode::Hang => {
        let release = async {
          self.calls.lock().unwrap().push(format!("release {}", peripheral.id));
          Ok::<_, Error>(())
        };
        connect_within(timeout, futures::future::pending(), release).await
      }
      LinkMode::Healthy | LinkMode::HangServices | LinkMode::BrokenCharacteristics => Ok(Box::new(MockConnection {
        tree: self.tree.clone(),
        calls: self.calls.clone(),
        listed: false,
        mode: self.mode,
      })),
    }
  }
}

struct MockConnection {
  tree: Vec<(ServiceInfo, Vec<CharacteristicInfo>)>,
  calls: Arc<Mutex<Vec<String>>>,
  listed: bool,
  mode: LinkMode,
}

#[async_trait]
impl GattConnection for MockConnection {
  async fn services(&mut self) -> Result<Vec<ServiceInfo>> {
    self.calls.lock().unwrap().push("services".into());
    if self.mode == LinkMode::HangServices {
      return futures::future::pending().await;
    }
    self.listed = true;
    Ok(self.tree.iter().map(|(service, _)| service.clone()).collect())
  }

  async fn characteristics(&mut self, service: &ServiceInfo) -> Result<Vec<CharacteristicInfo>> {
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("characteristics {}", service.uuid));
    if !self.listed {
      return Err(Error::InvalidRequest("characteristics requested before services".into()));
    }
    if self.mode == LinkMode::BrokenCharacteristics {
      return Err(Error::InvalidRequest("GATT error 0x0e".into()));
    }
    Ok(
      self
        .tree
        .iter()
        .find(|(candidate, _)| candidate == service)
        .map(|(_, characteristics)| characteristics.clone())
        .unwrap_or_default(),
    )
  }

  async fn close(&mut self) -> Result<()> {
    self.calls.lock().unwrap().push("close".into());
    Ok(())
  }
}

/// The controller side of an in-process bridge session.
pub struct Harness {
  commands: UnboundedSender<String>,
  events: mpsc::UnboundedReceiver<Event>,
  cancel: ScanCancel,
}

impl Harness {
  pub fn send(&self, command: &str) {
    self.commands.unbounded_send(command.to_string()).unwrap();
  }

  pub async fn next_event(&mut self) -> Event {
    timeout(WAIT, self.events.recv())
      .await
      .expect("timed out waiting for an event")
      .expect("session closed its event stream")
  }

  /// Yields to the session until its reader has seen a stop request.
  pub async fn wait_for_stop(&self) {
    timeout(WAIT, async {
      while !self.cancel.is_requested() {
        tokio::task::yield_now().await;
      }
    })
    .await
    .expect("stop request never reached the session");
  }

  /// Disconnects and returns every event emitted afterwards.
  pub async fn finish(mut self) -> Vec<Event> {
    drop(self.commands);
    let mut rest = Vec::new();
    while let Some(event) = timeout(WAIT, self.events.recv())
      .await
      .expect("session did not end after disconnect")
    {
      rest.push(event);
    }
    rest
  }
}

/// Runs a bridge session against `script`, which plays the controller.
pub async fn drive<F, Fut>(
  scanner: &MockScanner,
  link: &MockLink,
  registry: &mut PeripheralRegistry,
  config: &BridgeConfig,
  script: F,
) -> Result<()>
where
  F: FnOnce(Harness) -> Fut,
  Fut: Future<Output = ()>,
{
  let (events_tx, events_rx) = mpsc::unbounded_channel();
  let (commands_tx, commands_rx) = unbounded();
  let session = BridgeSession::new(scanner, link, registry, config, events_tx);
  let harness = Harness {
    commands: commands_tx,
    events: events_rx,
    cancel: session.cancel_handle(),
  };
  let (result, ()) = tokio::join!(session.run(commands_rx), script(harness));
  result
}
