//! Websocket event stream: one reader task decoding `{event, data}` frames
//! and one writer task draining the outbound queue.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use shared::protocol::{InboundEvent, OutboundEvent};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{channel::EventSink, session::SessionContext};

pub struct Connection {
    pub sink: Arc<dyn EventSink>,
    pub inbound: mpsc::UnboundedReceiver<InboundEvent>,
    pub tasks: TransportTasks,
}

/// Reader and writer tasks of an open connection.
pub struct TransportTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TransportTasks {
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

pub fn decode_frame(text: &str) -> Result<InboundEvent> {
    serde_json::from_str(text).context("invalid event frame")
}

pub fn encode_frame(event: &OutboundEvent) -> Result<String> {
    serde_json::to_string(event).with_context(|| format!("failed to encode {}", event.name()))
}

/// Opens the event stream for `session`. The token travels as a `token`
/// query parameter.
pub async fn connect(session: &SessionContext) -> Result<Connection> {
    if !session.is_authenticated() {
        return Err(anyhow!("not authenticated: missing access token"));
    }
    let mut ws_url = session.ws_url.clone();
    ws_url
        .query_pairs_mut()
        .append_pair("token", &session.access_token);

    let (ws_stream, _) = connect_async(ws_url.as_str())
        .await
        .with_context(|| format!("failed to connect websocket: {}", session.ws_url))?;
    info!(url = %session.ws_url, "channel: connected");
    let (mut ws_writer, mut ws_reader) = ws_stream.split();

    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let reader = tokio::spawn(async move {
        while let Some(msg) = ws_reader.next().await {
            match msg {
                Ok(Message::Text(text)) => match decode_frame(&text) {
                    Ok(event) => {
                        debug!(event = event.name(), "channel: received");
                        if inbound_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("channel: skipping frame: {err:#}"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("channel: websocket read failed: {err}");
                    break;
                }
            }
        }
        info!("channel: reader stopped");
    });

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundEvent>();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match encode_frame(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!("channel: {err:#}");
                    continue;
                }
            };
            if let Err(err) = ws_writer.send(Message::Text(text)).await {
                warn!(event = event.name(), "channel: websocket write failed: {err}");
                break;
            }
        }
        let _ = ws_writer.close().await;
    });

    Ok(Connection {
        sink: Arc::new(outbound_tx),
        inbound,
        tasks: TransportTasks { reader, writer },
    })
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
