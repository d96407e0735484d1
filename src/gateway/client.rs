//! Forward connections dialed by the gateway

use super::connection::{frame_text, run_connection};
use crate::config::UpstreamConfig;
use crate::transport::{HandlerTable, WsTransport};
use futures::{future, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Keep a forward connection to `upstream` open until `shutdown`,
/// reconnecting with exponential backoff.
pub(crate) fn spawn(
    upstream: UpstreamConfig,
    handlers: Arc<HandlerTable>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;
        while !shutdown.is_cancelled() {
            tracing::info!(url = %upstream.url, "Connecting to upstream");
            match tokio_tungstenite::connect_async(upstream.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    backoff = INITIAL_BACKOFF;
                    let (sink, stream) = ws_stream.split();
                    let sink = sink.with(|text: String| {
                        future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(
                            WsMessage::Text(text),
                        ))
                    });
                    let stream = stream
                        .take_while(|msg| {
                            future::ready(matches!(msg, Ok(m) if !m.is_close()))
                        })
                        .filter_map(|msg| {
                            future::ready(match msg {
                                Ok(WsMessage::Text(text)) => Some(text),
                                Ok(WsMessage::Binary(bytes)) => frame_text(bytes),
                                _ => None,
                            })
                        });

                    let id = format!("{}-{}", upstream.path, uuid::Uuid::new_v4());
                    let (transport, pump) = WsTransport::new(id);
                    run_connection(
                        &upstream.path,
                        transport,
                        pump,
                        handlers.clone(),
                        shutdown.clone(),
                        sink,
                        stream,
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!(url = %upstream.url, "Upstream connection failed: {}", e);
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        tracing::debug!(url = %upstream.url, "Upstream connector stopped");
    })
}
