use std::{future::Future, time::Duration};

use async_trait::async_trait;
use tokio::time::timeout;
use uuid::Uuid;

use crate::{
  codec::decode_properties,
  models::{CharacteristicJson, Event, Exploration, ExploreState, ServiceJson},
  registry::{PeripheralRecord, PeripheralRegistry},
  session::{emit, EventSender},
  Error, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
  pub start_handle: u16,
  pub end_handle: u16,
  pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
  pub value_handle: u16,
  pub end_handle: u16,
  pub uuid: Uuid,
  /// GATT characteristic property bits.
  pub properties: u16,
}

/// GATT transport capability.
#[async_trait]
pub trait GattLink: Send + Sync {
  /// Opens a connection within `timeout`. A connect that runs out of time must
  /// release whatever the transport already set up before it reports
  /// [`Error::Timeout`]; see [`connect_within`].
  async fn connect(&self, peripheral: &PeripheralRecord, timeout: Duration) -> Result<Box<dyn GattConnection>>;
}

/// An open GATT connection. Only one discovery call may be in flight at a time.
#[async_trait]
pub trait GattConnection: Send {
  async fn services(&mut self) -> Result<Vec<ServiceInfo>>;

  async fn characteristics(&mut self, service: &ServiceInfo) -> Result<Vec<CharacteristicInfo>>;

  async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExploreTimeouts {
  pub connect: Duration,
  /// Bound on each individual discovery call.
  pub discovery: Duration,
}

impl Default for ExploreTimeouts {
  fn default() -> Self {
    Self {
      connect: Duration::from_secs(10),
      discovery: Duration::from_secs(5),
    }
  }
}

pub struct Explorer<'a> {
  link: &'a dyn GattLink,
  registry: &'a PeripheralRegistry,
  events: &'a EventSender,
  timeouts: ExploreTimeouts,
}

impl<'a> Explorer<'a> {
  pub fn new(
    link: &'a dyn GattLink,
    registry: &'a PeripheralRegistry,
    events: &'a EventSender,
    timeouts: ExploreTimeouts,
  ) -> Self {
    Self {
      link,
      registry,
      events,
      timeouts,
    }
  }

  /// Connects to a known peripheral and reports its GATT tree.
  ///
  /// Emits `missing` for unknown ids, otherwise `start` followed by either
  /// `failed` or `finished`. Only a closed controller connection is returned
  /// as an error.
  pub async fn explore(&self, peripheral_id: &str) -> Result<ExploreState> {
    let Some(peripheral) = self.registry.lookup(peripheral_id) else {
      log::info!("Explore requested for unknown peripheral | peripheral_id={peripheral_id}");
      emit(
        self.events,
        Event::Explore(Exploration::new(peripheral_id, ExploreState::Missing)),
      )?;
      return Ok(ExploreState::Missing);
    };

    let mut report = Exploration::new(peripheral_id, ExploreState::Start);
    emit(self.events, Event::Explore(report.clone()))?;
    report.state = ExploreState::Failed;

    let connected = self.link.connect(peripheral, self.timeouts.connect).await;
    let mut connection = match connected {
      Ok(connection) => connection,
      Err(err) => {
        log::warn!("Connect failed | peripheral_id={peripheral_id} | err={err}");
        report.error = Some(err.to_string());
        emit(self.events, Event::Explore(report))?;
        return Ok(ExploreState::Failed);
      }
    };

    let tree = self.enumerate(&mut *connection).await;
    match bounded("disconnect", self.timeouts.discovery, connection.close()).await {
      Ok(()) => log::debug!("Connection closed | peripheral_id={peripheral_id}"),
      Err(err) => log::warn!("Failed to close connection | peripheral_id={peripheral_id} | err={err}"),
    }

    match tree {
      Ok(services) => {
        log::info!(
          "Explore finished | peripheral_id={} | services={} | characteristics={}",
          peripheral_id,
          services.len(),
          services.iter().map(|s| s.characteristics.len()).sum::<usize>()
        );
        report.state = ExploreState::Finished;
        report.services_json_data = Some(services);
      }
      Err(err) => {
        log::warn!("Discovery failed | peripheral_id={peripheral_id} | err={err}");
        report.error = Some(err.to_string());
      }
    }

    let state = report.state;
    emit(self.events, Event::Explore(report))?;
    Ok(state)
  }

  async fn enumerate(&self, connection: &mut dyn GattConnection) -> Result<Vec<ServiceJson>> {
    let limit = self.timeouts.discovery;

    // every service first: the transport runs one discovery at a time
    let services = bounded("service discovery", limit, connection.services()).await?;
    let mut tree: Vec<ServiceJson> = services
      .iter()
      .map(|service| ServiceJson {
        start_handle: service.start_handle,
        end_handle: service.end_handle,
        uuid: service.uuid.into(),
        characteristics: Vec::new(),
      })
      .collect();

    for (service, entry) in services.iter().zip(tree.iter_mut()) {
      let characteristics = bounded(
        "characteristic discovery",
        limit,
        connection.characteristics(service),
      )
      .await?;
      entry.characteristics = characteristics
        .into_iter()
        .map(|characteristic| CharacteristicJson {
          value_handle: characteristic.value_handle,
          end_handle: characteristic.end_handle,
          uuid: characteristic.uuid.into(),
          properties: decode_properties(characteristic.properties),
        })
        .collect();
    }
    Ok(tree)
  }
}

/// Drives `connecting` for at most `limit`. When time runs out the attempt is
/// dropped and `release` runs before the timeout is reported, so a connect the
/// host stack completes late does not leave the peripheral attached.
pub async fn connect_within<T, C, R>(limit: Duration, connecting: C, release: R) -> Result<T>
where
  C: Future<Output = Result<T>>,
  R: Future<Output = Result<()>>,
{
  match timeout(limit, connecting).await {
    Ok(connected) => connected,
    Err(_) => {
      if let Err(err) = release.await {
        log::warn!("Failed to release timed out connect | err={err}");
      }
      Err(Error::timeout("connect", limit))
    }
  }
}

async fn bounded<T, F>(operation: &'static str, limit: Duration, future: F) -> Result<T>
where
  F: Future<Output = Result<T>>,
{
  timeout(limit, future)
    .await
    .map_err(|_| Error::timeout(operation, limit))?
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicBool, Ordering};

  use super::*;

  #[tokio::test]
  async fn releases_only_when_connect_runs_out_of_time() {
    let flag = AtomicBool::new(false);
    let released = &flag;
    let release = move || async move {
      released.store(true, Ordering::SeqCst);
      Ok(())
    };

    let connected = connect_within(Duration::from_millis(50), async { Ok(7) }, release()).await;
    assert_eq!(connected.unwrap(), 7);
    assert!(!released.load(Ordering::SeqCst));

    let stalled =
      connect_within::<(), _, _>(Duration::from_millis(20), futures::future::pending(), release()).await;
    assert!(matches!(
      stalled,
      Err(Error::Timeout {
        operation: "connect",
        timeout_ms: 20
      })
    ));
    assert!(released.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn failed_release_still_reports_the_timeout() {
    let stalled = connect_within::<(), _, _>(
      Duration::from_millis(20),
      futures::future::pending(),
      async { Err(Error::Disconnected) },
    )
    .await;
    assert_eq!(stalled.unwrap_err().to_string(), "connect timed out after 20 ms");
  }
}
