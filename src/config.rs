use std::{
  net::{IpAddr, Ipv4Addr, SocketAddr},
  time::Duration,
};

use clap::Parser;
use log::LevelFilter;

use crate::{
  explore::ExploreTimeouts,
  scan::{ScanParams, ServiceUuidPolicy},
};

/// `0xB1E`, the port controllers expect the bridge on.
pub const DEFAULT_PORT: u16 = 0x0B1E;

/// Runtime settings shared by every controller session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeConfig {
  pub scan: ScanParams,
  pub service_policy: ServiceUuidPolicy,
  pub timeouts: ExploreTimeouts,
}

#[derive(Debug, Parser)]
#[command(name = "web-bluetooth-bridge", version)]
#[command(about = "Drive a BLE central over a WebSocket JSON protocol", long_about = None)]
pub struct Cli {
  /// Address to listen on
  #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
  pub bind: IpAddr,

  /// Port to listen on
  #[arg(short, long, default_value_t = DEFAULT_PORT)]
  pub port: u16,

  /// Index of the Bluetooth adapter to use
  #[arg(long, default_value_t = 0)]
  pub adapter: usize,

  /// How long a scan runs unless stopped
  #[arg(long, default_value_t = 15_000)]
  pub scan_duration_ms: u64,

  #[arg(long, default_value_t = 30_000)]
  pub scan_interval_us: u64,

  #[arg(long, default_value_t = 30_000)]
  pub scan_window_us: u64,

  /// Passive scanning (no scan requests, so fewer names)
  #[arg(long)]
  pub passive: bool,

  /// Whether sightings without advertised services are forwarded
  #[arg(long, value_enum, default_value_t = ServiceUuidPolicy::ForwardAll)]
  pub service_policy: ServiceUuidPolicy,

  #[arg(long, default_value_t = 10_000)]
  pub connect_timeout_ms: u64,

  /// Bound on each service or characteristic discovery call
  #[arg(long, default_value_t = 5_000)]
  pub discovery_timeout_ms: u64,

  /// Log every JSON message sent and received
  #[arg(short, long)]
  pub debug: bool,
}

impl Cli {
  pub fn listen_addr(&self) -> SocketAddr {
    SocketAddr::new(self.bind, self.port)
  }

  pub fn log_level(&self) -> LevelFilter {
    if self.debug {
      LevelFilter::Debug
    } else {
      LevelFilter::Info
    }
  }

  pub fn bridge_config(&self) -> BridgeConfig {
    BridgeConfig {
      scan: ScanParams {
        duration: Duration::from_millis(self.scan_duration_ms),
        interval: Duration::from_micros(self.scan_interval_us),
        window: Duration::from_micros(self.scan_window_us),
        active: !self.passive,
      },
      service_policy: self.service_policy,
      timeouts: ExploreTimeouts {
        connect: Duration::from_millis(self.connect_timeout_ms),
        discovery: Duration::from_millis(self.discovery_timeout_ms),
      },
    }
  }
}
