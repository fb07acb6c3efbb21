use futures::{future, SinkExt, Stream, StreamExt};
use tokio::{
  net::{TcpListener, TcpStream},
  sync::mpsc,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::{
  config::BridgeConfig,
  explore::GattLink,
  models::Event,
  registry::PeripheralRegistry,
  scan::Scanner,
  session::BridgeSession,
  Error, Result,
};

/// Accepts controllers one at a time, forever.
///
/// Peripherals sighted on one connection stay explorable from later ones.
pub async fn serve(
  listener: TcpListener,
  scanner: &dyn Scanner,
  link: &dyn GattLink,
  config: &BridgeConfig,
) -> Result<()> {
  let mut registry = PeripheralRegistry::new();
  log::info!("Listening | addr={}", listener.local_addr()?);
  loop {
    let (stream, peer) = listener.accept().await?;
    log::info!("Connect from {peer}");
    match serve_connection(stream, scanner, link, &mut registry, config).await {
      Ok(()) => log::info!(
        "Controller disconnected | peer={} | known_peripherals={}",
        peer,
        registry.len()
      ),
      Err(err) => log::warn!("Controller session failed | peer={peer} | err={err}"),
    }
  }
}

/// Upgrades one TCP stream to a WebSocket and runs a bridge session on it.
pub async fn serve_connection(
  stream: TcpStream,
  scanner: &dyn Scanner,
  link: &dyn GattLink,
  registry: &mut PeripheralRegistry,
  config: &BridgeConfig,
) -> Result<()> {
  let socket = accept_async(stream).await?;
  let (mut sink, source) = socket.split();
  let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Event>();

  let writer = async move {
    while let Some(event) = events_rx.recv().await {
      let payload = serde_json::to_string(&event)?;
      log::debug!("Sending | payload={payload}");
      sink.send(Message::Text(payload)).await?;
    }
    // the peer may already have completed the close handshake
    let _ = sink.close().await;
    Ok::<_, Error>(())
  };

  let session = BridgeSession::new(scanner, link, registry, config, events_tx);
  let (session_result, writer_result) = tokio::join!(session.run(text_frames(source)), writer);
  writer_result?;
  session_result
}

/// Command payloads carried by a WebSocket, ending at the first close frame or
/// transport error.
fn text_frames<S>(source: S) -> impl Stream<Item = String> + Unpin
where
  S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
  source
    .take_while(|frame| {
      let open = match frame {
        Ok(Message::Close(_)) => false,
        Ok(_) => true,
        Err(err) => {
          log::warn!("WebSocket receive failed | err={err}");
          false
        }
      };
      future::ready(open)
    })
    .filter_map(|frame| {
      future::ready(match frame {
        Ok(Message::Text(text)) => Some(text),
        Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok(),
        _ => None,
      })
    })
}
