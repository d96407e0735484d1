//! Connection loop shared by accepted and dialed sockets

use crate::transport::{HandlerTable, Transport, WsPump, WsTransport};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pump one socket until either side closes, the transport is
/// terminated, or the gateway shuts down.
///
/// `sink` takes serialized frames; `stream` yields received text frames
/// and ends when the peer goes away. Received frames are handed to a
/// per-connection dispatch task in arrival order, so a slow handler never
/// holds up outbound writes.
pub(crate) async fn run_connection<Si, St>(
    path: &str,
    transport: Arc<WsTransport>,
    pump: WsPump,
    handlers: Arc<HandlerTable>,
    shutdown: CancellationToken,
    mut sink: Si,
    mut stream: St,
) where
    Si: Sink<String> + Unpin + Send,
    St: Stream<Item = String> + Unpin + Send,
{
    let WsPump {
        mut outbound,
        cancel,
    } = pump;
    let id = transport.id().to_string();
    tracing::info!(connection = %id, path = %path, "Connection opened");

    let (inbound, dispatcher) = spawn_dispatcher(path, transport.clone(), handlers);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = cancel.cancelled() => {
                tracing::warn!(connection = %id, "Connection terminated");
                break;
            }
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if sink.send(text).await.is_err() {
                        tracing::debug!(connection = %id, "Socket send failed");
                        break;
                    }
                }
                None => break,
            },
            frame = stream.next() => match frame {
                Some(text) => {
                    if inbound.send(text).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    cancel.cancel();
    let _ = sink.close().await;
    // Frames already received are still delivered
    drop(inbound);
    let _ = dispatcher.await;
    tracing::info!(connection = %id, path = %path, "Connection closed");
}

fn spawn_dispatcher(
    path: &str,
    transport: Arc<WsTransport>,
    handlers: Arc<HandlerTable>,
) -> (mpsc::UnboundedSender<String>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let path = path.to_string();
    let task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            let dyn_transport: Arc<dyn Transport> = transport.clone();
            if handlers.dispatch(&path, dyn_transport, &text).await == 0 {
                tracing::debug!(connection = %transport.id(), path = %path, "No handler for frame");
            }
        }
    });
    (tx, task)
}

/// Accept text frames and UTF-8 binary frames
pub(crate) fn frame_text(bytes: Vec<u8>) -> Option<String> {
    String::from_utf8(bytes).ok()
}
