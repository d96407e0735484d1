//! Correlated request channel
//!
//! Multiplexes API calls over a shared transport. Each call gets a fresh
//! `echo` token and a pending slot; whoever reads the transport hands
//! responses back through [`RequestChannel::resolve`], which settles the
//! slot with the matching token regardless of arrival order.
//!
//! Removal from the pending map is the settle-once gate. The resolver and
//! the timeout both try to remove the entry; only the one that succeeds
//! gets to settle the call, so a late response racing a timeout is a no-op.
//! A call future dropped before it settles removes its own entry.

use super::protocol::{ApiRequest, ApiResponse};
use crate::error::{Error, Result};
use crate::logging;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::Level;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);

/// An outstanding call awaiting its response
struct PendingRequest {
    action: String,
    created_at: DateTime<Utc>,
    tx: oneshot::Sender<Result<ApiResponse>>,
}

type PendingMap = Mutex<HashMap<String, PendingRequest>>;

/// Removes a call's pending entry when the call ends, however it ends
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    echo: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(self.echo);
    }
}

/// Correlated request/response channel
#[derive(Clone)]
pub struct RequestChannel {
    source: String,
    timeout: Duration,
    pending: Arc<PendingMap>,
}

impl RequestChannel {
    /// Create a channel that logs under `source`
    pub fn new(source: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source: source.into(),
            timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of calls awaiting a response
    pub async fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Issue `action` on `transport` and wait for the correlated response.
    ///
    /// Fails with [`Error::RequestTimeout`] if nothing arrives within the
    /// timeout window, in which case the transport is terminated, or with
    /// [`Error::Api`] if the platform answers with a failure code.
    pub async fn call(
        &self,
        transport: &dyn Transport,
        action: &str,
        params: Value,
    ) -> Result<ApiResponse> {
        let request = ApiRequest::new(action, params);
        let echo = request.echo.clone();
        let (tx, mut rx) = oneshot::channel();

        // Register before writing so a fast response cannot miss its slot
        self.lock().insert(
            echo.clone(),
            PendingRequest {
                action: request.action.clone(),
                created_at: Utc::now(),
                tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            echo: &echo,
        };

        if transport.can_write() {
            let written = match serde_json::to_value(&request) {
                Ok(frame) => transport.send_frame(&frame).await,
                Err(e) => Err(e.into()),
            };
            written?;
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let outcome = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                // Bookkeeping was cleared without settling; wait out the window
                tokio::time::sleep_until(deadline).await;
                return Err(self.expire(transport, request));
            }
            Err(_) => {
                let expired = self.lock().remove(&echo).is_some();
                if expired {
                    return Err(self.expire(transport, request));
                }
                // A resolver removed the entry first and already sent
                match rx.await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(self.expire(transport, request)),
                }
            }
        };

        let response = outcome?;
        if !response.is_success() {
            logging::log(
                Level::ERROR,
                &format!(
                    "API error: {} {}",
                    request.action,
                    serde_json::to_string(&response).unwrap_or_default()
                ),
                &self.source,
            );
            return Err(Error::Api { request, response });
        }
        Ok(response)
    }

    /// Settle the pending call matching the response's `echo`.
    ///
    /// Returns `false` when no call is waiting on that token (unknown,
    /// already timed out, or already resolved).
    pub async fn resolve(&self, response: ApiResponse) -> bool {
        let Some(echo) = response.echo() else {
            return false;
        };
        let removed = self.lock().remove(&echo);
        let Some(pending) = removed else {
            tracing::debug!(source = %self.source, echo = %echo, "No pending request for response");
            return false;
        };

        let elapsed = Utc::now() - pending.created_at;
        tracing::debug!(
            source = %self.source,
            action = %pending.action,
            elapsed_ms = elapsed.num_milliseconds(),
            "Request settled"
        );
        // The caller may have given up already; that is fine
        let _ = pending.tx.send(Ok(response));
        true
    }

    /// Drop all pending bookkeeping without settling. Callers still waiting
    /// fail at their own timeout.
    pub async fn clear(&self) -> usize {
        let mut pending = self.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    /// Settle every pending call with [`Error::Destroyed`]
    pub async fn reject_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, pending) in drained {
            let _ = pending.tx.send(Err(Error::Destroyed));
        }
        count
    }

    fn expire(&self, transport: &dyn Transport, request: ApiRequest) -> Error {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        logging::log(
            Level::ERROR,
            &format!(
                "Request timed out: {} {}",
                request.action,
                serde_json::to_string(&request).unwrap_or_default()
            ),
            &self.source,
        );
        // A stalled call means a dead peer
        transport.terminate();
        Error::RequestTimeout {
            request,
            timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Instant;

    fn response_for(frame: &Value, body: Value) -> ApiResponse {
        let mut body = body;
        body["echo"] = frame["echo"].clone();
        ApiResponse::from_value(body).unwrap()
    }

    async fn wait_for_frames(transport: &MockTransport, count: usize) -> Vec<Value> {
        for _ in 0..200 {
            let frames = transport.frames();
            if frames.len() >= count {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} frames", count);
    }

    #[tokio::test]
    async fn test_call_resolves_with_response() {
        let channel = RequestChannel::new("test", Duration::from_secs(5));
        let transport = Arc::new(MockTransport::new("t"));

        let call = {
            let channel = channel.clone();
            let transport = transport.clone();
            tokio::spawn(async move {
                channel
                    .call(transport.as_ref(), "get_status", json!({ "x": 1 }))
                    .await
            })
        };

        let frame = wait_for_frames(&transport, 1).await.remove(0);
        assert_eq!(frame["action"], "get_status");
        assert_eq!(frame["params"]["x"], 1);

        let settled = channel
            .resolve(response_for(
                &frame,
                json!({ "retcode": 0, "data": { "online": true } }),
            ))
            .await;
        assert!(settled);

        let response = call.await.unwrap().unwrap();
        assert_eq!(response.get("online"), Some(&json!(true)));
        assert_eq!(channel.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses_match_tokens() {
        let channel = RequestChannel::new("test", Duration::from_secs(5));
        let transport = Arc::new(MockTransport::new("t"));

        let mut calls = Vec::new();
        for i in 0..5 {
            let channel = channel.clone();
            let transport = transport.clone();
            calls.push(tokio::spawn(async move {
                channel
                    .call(transport.as_ref(), "echo", json!({ "n": i }))
                    .await
            }));
        }

        let frames = wait_for_frames(&transport, 5).await;
        let tokens: HashSet<_> = frames.iter().map(|f| f["echo"].to_string()).collect();
        assert_eq!(tokens.len(), 5);

        // Answer in reverse issue order, echoing each request's own param
        for frame in frames.iter().rev() {
            let n = frame["params"]["n"].clone();
            assert!(channel.resolve(response_for(frame, json!({ "retcode": 0, "data": { "n": n } }))).await);
        }

        for (i, call) in calls.into_iter().enumerate() {
            let response = call.await.unwrap().unwrap();
            assert_eq!(response.get("n"), Some(&json!(i)));
        }
    }

    #[tokio::test]
    async fn test_timeout_terminates_transport_once() {
        let channel = RequestChannel::new("test", Duration::from_millis(50));
        let transport = MockTransport::new("silent");

        let started = Instant::now();
        let err = channel
            .call(&transport, "never_answered", json!({}))
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(err.kind(), "RequestTimeout");
        assert!(matches!(err, Error::RequestTimeout { timeout_ms: 50, .. }));
        assert_eq!(transport.terminate_count(), 1);
        assert_eq!(channel.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_late_response_after_timeout_is_noop() {
        let channel = RequestChannel::new("test", Duration::from_millis(20));
        let transport = MockTransport::new("t");

        let err = channel.call(&transport, "slow", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { .. }));

        let frame = transport.last_frame().unwrap();
        let settled = channel
            .resolve(response_for(&frame, json!({ "retcode": 0 })))
            .await;

        assert!(!settled);
        assert_eq!(channel.pending_count().await, 0);
        assert_eq!(transport.terminate_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_code_rejects_with_api_error() {
        let channel = RequestChannel::new("test", Duration::from_secs(5));
        let transport = Arc::new(MockTransport::new("t"));

        let call = {
            let channel = channel.clone();
            let transport = transport.clone();
            tokio::spawn(async move { channel.call(transport.as_ref(), "delete_msg", json!({})).await })
        };

        let frame = wait_for_frames(&transport, 1).await.remove(0);
        channel
            .resolve(response_for(&frame, json!({ "retcode": 100, "msg": "no such message" })))
            .await;

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "ApiError");
        assert_eq!(err.to_string(), "API error: no such message");
        assert_eq!(transport.terminate_count(), 0);
    }

    #[tokio::test]
    async fn test_async_code_is_success() {
        let channel = RequestChannel::new("test", Duration::from_secs(5));
        let transport = Arc::new(MockTransport::new("t"));

        let call = {
            let channel = channel.clone();
            let transport = transport.clone();
            tokio::spawn(async move { channel.call(transport.as_ref(), "queued", json!({})).await })
        };

        let frame = wait_for_frames(&transport, 1).await.remove(0);
        channel
            .resolve(response_for(&frame, json!({ "retcode": 1, "status": "async" })))
            .await;

        assert!(call.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_read_only_transport_waits_for_external_resolution() {
        let channel = RequestChannel::new("test", Duration::from_secs(5));
        let transport = Arc::new(MockTransport::read_only("ro"));

        let call = {
            let channel = channel.clone();
            let transport = transport.clone();
            tokio::spawn(async move { channel.call(transport.as_ref(), "get_status", json!({})).await })
        };

        // Nothing is written; find the token through the pending map
        let echo = loop {
            if let Some(echo) = channel.lock().keys().next().cloned() {
                break echo;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(transport.frames().is_empty());

        let response = ApiResponse::from_value(json!({ "retcode": 0, "echo": echo })).unwrap();
        assert!(channel.resolve(response).await);
        assert!(call.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_write_failure_cleans_up() {
        let channel = RequestChannel::new("test", Duration::from_secs(5));
        let transport = MockTransport::broken("broken");

        let err = channel.call(&transport, "x", json!({})).await.unwrap_err();

        assert_eq!(err.kind(), "TransportError");
        assert_eq!(channel.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_reject_all_settles_with_destroyed() {
        let channel = RequestChannel::new("test", Duration::from_secs(5));
        let transport = Arc::new(MockTransport::new("t"));

        let call = {
            let channel = channel.clone();
            let transport = transport.clone();
            tokio::spawn(async move { channel.call(transport.as_ref(), "x", json!({})).await })
        };
        wait_for_frames(&transport, 1).await;

        assert_eq!(channel.reject_all().await, 1);
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Destroyed));
    }

    #[tokio::test]
    async fn test_clear_leaves_callers_to_their_timeout() {
        let channel = RequestChannel::new("test", Duration::from_millis(60));
        let transport = Arc::new(MockTransport::new("t"));

        let started = Instant::now();
        let call = {
            let channel = channel.clone();
            let transport = transport.clone();
            tokio::spawn(async move { channel.call(transport.as_ref(), "x", json!({})).await })
        };
        wait_for_frames(&transport, 1).await;

        assert_eq!(channel.clear().await, 1);
        let err = call.await.unwrap().unwrap_err();

        assert!(matches!(err, Error::RequestTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(transport.terminate_count(), 1);
    }

    async fn resolve_once(body: Value) -> Result<ApiResponse> {
        let channel = RequestChannel::new("test", Duration::from_secs(5));
        let transport = Arc::new(MockTransport::new("t"));

        let call = {
            let channel = channel.clone();
            let transport = transport.clone();
            tokio::spawn(async move { channel.call(transport.as_ref(), "x", json!({})).await })
        };

        let frame = wait_for_frames(&transport, 1).await.remove(0);
        assert!(channel.resolve(response_for(&frame, body)).await);
        call.await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_retcode_is_api_error() {
        let err = resolve_once(json!({ "status": "failed" })).await.unwrap_err();
        assert_eq!(err.kind(), "ApiError");
    }

    #[tokio::test]
    async fn test_non_integer_retcode_is_api_error() {
        let err = resolve_once(json!({ "retcode": "100" })).await.unwrap_err();
        assert_eq!(err.kind(), "ApiError");

        assert!(resolve_once(json!({ "retcode": 0 })).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_calls_release_pending_entries() {
        let channel = RequestChannel::new("test", Duration::from_secs(5));
        let transport = MockTransport::new("t");

        for _ in 0..3 {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(5),
                channel.call(&transport, "slow", json!({})),
            )
            .await;
            assert!(abandoned.is_err());
        }

        assert_eq!(transport.frames().len(), 3);
        assert_eq!(channel.pending_count().await, 0);
        assert_eq!(transport.terminate_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_without_echo_is_ignored() {
        let channel = RequestChannel::new("test", Duration::from_secs(1));
        let response = ApiResponse::from_value(json!({ "retcode": 0 })).unwrap();

        assert!(!channel.resolve(response).await);
    }
}
