use std::{
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
  time::Duration,
};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use tokio::time::{timeout_at, Instant};

use crate::{
  codec::{manufacturer_hex, PrettyUuid},
  models::{Advertisement, Discovery, Event},
  registry::{AdvertisementSighting, PeripheralRegistry},
  session::{emit, EventSender},
  Result,
};

pub type SightingStream = BoxStream<'static, AdvertisementSighting>;

/// Radio capability that produces advertisement reports.
#[async_trait]
pub trait Scanner: Send + Sync {
  /// Starts scanning and returns the stream of reports. The stream may end on
  /// its own once the radio stops.
  async fn start(&self, params: &ScanParams) -> Result<SightingStream>;

  /// Halts an active scan.
  async fn stop(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
  pub duration: Duration,
  pub interval: Duration,
  pub window: Duration,
  pub active: bool,
}

impl Default for ScanParams {
  fn default() -> Self {
    Self {
      duration: Duration::from_millis(15_000),
      interval: Duration::from_micros(30_000),
      window: Duration::from_micros(30_000),
      active: true,
    }
  }
}

/// Whether sightings without any advertised service UUID reach the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ServiceUuidPolicy {
  #[default]
  ForwardAll,
  RequireServices,
}

/// Cooperative stop requests shared between the command reader and the scans
/// it queues.
///
/// Every queued scan gets a ticket. A stop request cancels every ticket issued
/// before it, so a stop that arrives while idle never leaks into a later scan.
#[derive(Debug, Clone, Default)]
pub struct ScanCancel(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
  issued: AtomicU64,
  cancelled_through: AtomicU64,
}

impl ScanCancel {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn issue(&self) -> ScanToken {
    let ticket = self.0.issued.fetch_add(1, Ordering::SeqCst) + 1;
    ScanToken {
      state: self.0.clone(),
      ticket,
    }
  }

  pub fn request(&self) {
    let issued = self.0.issued.load(Ordering::SeqCst);
    self.0.cancelled_through.fetch_max(issued, Ordering::SeqCst);
  }

  /// True once the most recently issued scan has been asked to stop.
  #[doc(hidden)]
  pub fn is_requested(&self) -> bool {
    let issued = self.0.issued.load(Ordering::SeqCst);
    issued > 0 && self.0.cancelled_through.load(Ordering::SeqCst) >= issued
  }
}

/// Cancellation token carried by one scan.
#[derive(Debug, Clone)]
pub struct ScanToken {
  state: Arc<CancelState>,
  ticket: u64,
}

impl ScanToken {
  pub fn is_cancelled(&self) -> bool {
    self.state.cancelled_through.load(Ordering::SeqCst) >= self.ticket
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
  /// The scan duration elapsed.
  Completed,
  /// A stop request was observed at a sighting boundary.
  Cancelled,
  /// The scanner ended the stream before the duration elapsed.
  Exhausted,
  /// The scanner refused to start.
  Failed,
}

/// One scan, from the `startScanning` bracket to the `stopScanning` bracket.
pub struct ScanSession<'a> {
  scanner: &'a dyn Scanner,
  registry: &'a mut PeripheralRegistry,
  token: ScanToken,
  events: &'a EventSender,
  policy: ServiceUuidPolicy,
  forwarded: usize,
}

impl<'a> ScanSession<'a> {
  pub fn new(
    scanner: &'a dyn Scanner,
    registry: &'a mut PeripheralRegistry,
    token: ScanToken,
    events: &'a EventSender,
    policy: ServiceUuidPolicy,
  ) -> Self {
    Self {
      scanner,
      registry,
      token,
      events,
      policy,
      forwarded: 0,
    }
  }

  pub async fn run(mut self, params: &ScanParams) -> Result<ScanOutcome> {
    emit(self.events, Event::StartScanning)?;
    log::info!(
      "Scan started | duration_ms={} | interval_us={} | window_us={} | active={} | policy={:?}",
      params.duration.as_millis(),
      params.interval.as_micros(),
      params.window.as_micros(),
      params.active,
      self.policy
    );

    let outcome = if self.token.is_cancelled() {
      ScanOutcome::Cancelled
    } else {
      match self.scanner.start(params).await {
        Ok(sightings) => self.consume(sightings, params.duration).await?,
        Err(err) => {
          log::warn!("Scanner failed to start | err={err}");
          emit(self.events, Event::error(format!("startScanning: {err}")))?;
          ScanOutcome::Failed
        }
      }
    };

    emit(self.events, Event::StopScanning)?;
    log::info!(
      "Scan finished | outcome={:?} | forwarded={} | known_peripherals={}",
      outcome,
      self.forwarded,
      self.registry.len()
    );
    Ok(outcome)
  }

  async fn consume(&mut self, mut sightings: SightingStream, duration: Duration) -> Result<ScanOutcome> {
    let deadline = Instant::now() + duration;
    loop {
      let sighting = match timeout_at(deadline, sightings.next()).await {
        Ok(Some(sighting)) => sighting,
        Ok(None) => return Ok(ScanOutcome::Exhausted),
        Err(_) => {
          self.stop_scanner().await;
          return Ok(ScanOutcome::Completed);
        }
      };

      if self.token.is_cancelled() {
        self.stop_scanner().await;
        return Ok(ScanOutcome::Cancelled);
      }

      if let Err(err) = self.forward(&sighting) {
        self.stop_scanner().await;
        return Err(err);
      }
    }
  }

  fn forward(&mut self, sighting: &AdvertisementSighting) -> Result<()> {
    let record = self.registry.upsert(sighting);
    if self.policy == ServiceUuidPolicy::RequireServices && sighting.service_uuids.is_empty() {
      log::debug!("Skipping sighting without services | peripheral_id={}", record.id);
      return Ok(());
    }

    let discovery = Discovery {
      peripheral_id: record.id,
      name: record.display_name.clone(),
      rssi: sighting.rssi,
      address: sighting.address.clone(),
      connectable: sighting.connectable,
      advertisement: Advertisement {
        local_name: record.display_name,
        service_uuids: sighting
          .service_uuids
          .iter()
          .copied()
          .map(PrettyUuid::from)
          .collect(),
        manufacturer_data: manufacturer_hex(&sighting.manufacturer_data),
      },
    };
    emit(self.events, Event::Discover(discovery))?;
    self.forwarded += 1;
    Ok(())
  }

  async fn stop_scanner(&self) {
    if let Err(err) = self.scanner.stop().await {
      log::warn!("Failed to stop scanner | err={err}");
    }
  }
}
