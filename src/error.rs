pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  Btleplug(#[from] btleplug::Error),
  #[error(transparent)]
  UuidParse(#[from] uuid::Error),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error(transparent)]
  WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
  #[error("Bluetooth adapter is not available on this system")]
  NoAdapter,
  #[error("Bluetooth adapter {0} not found")]
  AdapterNotFound(usize),
  #[error("Device {0} not found")]
  DeviceNotFound(String),
  #[error("Service {service_uuid} not found for device {device_id}")]
  ServiceNotFound {
    device_id: String,
    service_uuid: String,
  },
  #[error("{operation} timed out after {timeout_ms} ms")]
  Timeout {
    operation: &'static str,
    timeout_ms: u64,
  },
  #[error("{0}")]
  InvalidRequest(String),
  #[error("Controller connection closed")]
  Disconnected,
}

impl Error {
  pub(crate) fn timeout(operation: &'static str, limit: std::time::Duration) -> Self {
    Error::Timeout {
      operation,
      timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[test]
  fn timeout_reports_whole_milliseconds() {
    let err = Error::timeout("connect", Duration::from_micros(50_900));
    assert_eq!(err.to_string(), "connect timed out after 50 ms");
  }

  #[test]
  fn timeout_saturates_oversized_limits() {
    let err = Error::timeout("service discovery", Duration::MAX);
    assert!(matches!(err, Error::Timeout { timeout_ms: u64::MAX, .. }));
  }
}
