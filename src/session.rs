use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::{
  config::BridgeConfig,
  explore::{Explorer, GattLink},
  models::{AdapterState, Command, Event},
  registry::PeripheralRegistry,
  scan::{ScanCancel, ScanSession, ScanToken, Scanner},
  Error, Result,
};

pub type EventSender = mpsc::UnboundedSender<Event>;

pub(crate) fn emit(events: &EventSender, event: Event) -> Result<()> {
  events.send(event).map_err(|_| Error::Disconnected)
}

/// Work queued by the command reader for the dispatcher, in arrival order.
#[derive(Debug)]
enum Job {
  Scan(ScanToken),
  Explore(String),
  Reply(Event),
}

/// One controller connection: reads commands, runs them, and emits events.
pub struct BridgeSession<'a> {
  scanner: &'a dyn Scanner,
  link: &'a dyn GattLink,
  registry: &'a mut PeripheralRegistry,
  config: &'a BridgeConfig,
  events: EventSender,
  cancel: ScanCancel,
}

impl<'a> BridgeSession<'a> {
  pub fn new(
    scanner: &'a dyn Scanner,
    link: &'a dyn GattLink,
    registry: &'a mut PeripheralRegistry,
    config: &'a BridgeConfig,
    events: EventSender,
  ) -> Self {
    Self {
      scanner,
      link,
      registry,
      config,
      events,
      cancel: ScanCancel::new(),
    }
  }

  #[doc(hidden)]
  pub fn cancel_handle(&self) -> ScanCancel {
    self.cancel.clone()
  }

  /// Serves the connection until `inbound` ends or the controller stops
  /// receiving events.
  ///
  /// Commands run one at a time in arrival order. `stopScanning` bypasses the
  /// queue so it can reach a scan that is still running.
  pub async fn run<I>(mut self, inbound: I) -> Result<()>
  where
    I: Stream<Item = String> + Unpin,
  {
    emit(
      &self.events,
      Event::StateChange {
        state: AdapterState::PoweredOn,
      },
    )?;

    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
    let reader = read_commands(inbound, jobs_tx, self.cancel.clone());
    let dispatcher = self.dispatch(jobs_rx);
    tokio::pin!(reader, dispatcher);

    tokio::select! {
      () = &mut reader => dispatcher.await,
      result = &mut dispatcher => result,
    }
  }

  async fn dispatch(&mut self, mut jobs: mpsc::UnboundedReceiver<Job>) -> Result<()> {
    while let Some(job) = jobs.recv().await {
      match job {
        Job::Scan(token) => {
          ScanSession::new(
            self.scanner,
            &mut *self.registry,
            token,
            &self.events,
            self.config.service_policy,
          )
          .run(&self.config.scan)
          .await?;
        }
        Job::Explore(peripheral_id) => {
          Explorer::new(self.link, &*self.registry, &self.events, self.config.timeouts)
            .explore(&peripheral_id)
            .await?;
        }
        Job::Reply(event) => emit(&self.events, event)?,
      }
    }
    Ok(())
  }
}

async fn read_commands<I>(mut inbound: I, jobs: mpsc::UnboundedSender<Job>, cancel: ScanCancel)
where
  I: Stream<Item = String> + Unpin,
{
  while let Some(text) = inbound.next().await {
    log::debug!("Received | payload={text}");
    let job = match Command::parse(&text) {
      Ok(Command::StopScanning) => {
        cancel.request();
        continue;
      }
      Ok(Command::StartScanning) => Job::Scan(cancel.issue()),
      Ok(Command::Explore { peripheral_id }) => Job::Explore(peripheral_id),
      Ok(Command::Unsupported(action)) => {
        log::warn!("Unsupported action | action={action}");
        Job::Reply(Event::not_implemented(&action))
      }
      Err(Error::InvalidRequest(message)) => Job::Reply(Event::error(message)),
      Err(err) => {
        log::warn!("Malformed command | err={err}");
        Job::Reply(Event::error(format!("invalid command: {err}")))
      }
    };
    if jobs.send(job).is_err() {
      break;
    }
  }
  // the controller is gone; let a running scan wind down
  cancel.request();
}
