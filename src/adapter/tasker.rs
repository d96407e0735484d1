//! Tasker adapter
//!
//! Bridges the host to a chat platform over one or more duplex transports.
//! Outbound operations compile messages and issue correlated API calls;
//! inbound frames either settle a pending call (they carry `echo`) or are
//! forwarded as [`InboundEvent`]s.

use super::dispatch::{dispatch, message_id, SendResult, SendTarget};
use super::registry::{Adapter, AdapterState};
use crate::config::{DestroyPolicy, TaskerConfig};
use crate::error::{Error, Result};
use crate::logging;
use crate::rpc::{ApiResponse, RequestChannel};
use crate::segment::{
    parse_inbound, FileMaterializer, MessageCompiler, OutboundMessage, Segment,
};
use crate::transport::{FrameHandler, HandlerTable, Transport};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::Level;

/// Where a send is delivered
#[derive(Clone)]
pub struct Target {
    /// Bot account the send goes out from
    pub self_id: String,
    /// Friend (or group member) addressed
    pub user_id: Option<String>,
    /// Group addressed
    pub group_id: Option<String>,
    /// Connection carrying the bot
    pub transport: Arc<dyn Transport>,
}

impl Target {
    /// A friend conversation
    pub fn friend(transport: Arc<dyn Transport>, self_id: impl ToString, user_id: impl ToString) -> Self {
        Self {
            self_id: self_id.to_string(),
            user_id: Some(user_id.to_string()),
            group_id: None,
            transport,
        }
    }

    /// A group conversation
    pub fn group(transport: Arc<dyn Transport>, self_id: impl ToString, group_id: impl ToString) -> Self {
        Self {
            self_id: self_id.to_string(),
            user_id: None,
            group_id: Some(group_id.to_string()),
            transport,
        }
    }

    fn user_id(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .ok_or_else(|| Error::Adapter("Target has no user_id".to_string()))
    }

    fn group_id(&self) -> Result<&str> {
        self.group_id
            .as_deref()
            .ok_or_else(|| Error::Adapter("Target has no group_id".to_string()))
    }
}

/// Per-item outcome of a recall
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecallOutcome {
    pub success: bool,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A non-response frame received from the platform
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Adapter id
    pub adapter: String,
    /// Connection the frame arrived on
    pub connection: String,
    /// Bot account the event belongs to
    pub self_id: Option<String>,
    /// Event category (`message`, `notice`, `meta_event`, ...)
    pub post_type: String,
    /// Parsed message content; empty for non-message events
    pub message: Vec<Segment>,
    /// The frame as received
    pub raw: Value,
}

/// Chat-platform adapter
pub struct Tasker {
    id: String,
    name: String,
    path: String,
    destroy_policy: DestroyPolicy,
    channel: RequestChannel,
    compiler: MessageCompiler,
    state: RwLock<AdapterState>,
    bots: RwLock<HashMap<String, Arc<dyn Transport>>>,
    events: Option<mpsc::Sender<InboundEvent>>,
}

impl Tasker {
    /// Create an adapter from configuration
    pub fn new(config: &TaskerConfig) -> Result<Self> {
        config.validate()?;
        let files = FileMaterializer::new((&config.files).into())?;
        Ok(Self {
            id: config.adapter.id.clone(),
            name: config.adapter.name.clone(),
            path: config.adapter.path().to_string(),
            destroy_policy: config.adapter.destroy_policy,
            channel: RequestChannel::new(config.adapter.id.clone(), config.adapter.request_timeout()),
            compiler: MessageCompiler::new(files),
            state: RwLock::new(AdapterState::Unregistered),
            bots: RwLock::new(HashMap::new()),
            events: None,
        })
    }

    /// Forward inbound events to `tx`
    pub fn with_events(mut self, tx: mpsc::Sender<InboundEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Request channel used for API calls
    pub fn channel(&self) -> &RequestChannel {
        &self.channel
    }

    /// Transport most recently seen carrying `self_id`
    pub fn bot(&self, self_id: &str) -> Option<Arc<dyn Transport>> {
        self.bots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(self_id)
            .cloned()
    }

    /// Issue a correlated API call on `transport`
    pub async fn call(&self, transport: &dyn Transport, action: &str, params: Value) -> Result<ApiResponse> {
        self.channel.call(transport, action, params).await
    }

    /// Send a message to a friend
    pub async fn send_friend_message(
        &self,
        target: &Target,
        message: impl Into<OutboundMessage>,
    ) -> Result<SendResult> {
        let route = Route {
            tasker: self,
            target,
            scope: Scope::Friend(target.user_id()?),
        };
        dispatch(&self.compiler, message, &route).await
    }

    /// Send a message to a group. A lone poke is sent as a poke
    /// interaction instead.
    pub async fn send_group_message(
        &self,
        target: &Target,
        message: impl Into<OutboundMessage>,
    ) -> Result<SendResult> {
        let message = message.into();
        if let Some(user_id) = message.as_poke() {
            return self.send_poke(target, &user_id).await.map(SendResult::Single);
        }

        let route = Route {
            tasker: self,
            target,
            scope: Scope::Group(target.group_id()?),
        };
        dispatch(&self.compiler, message, &route).await
    }

    /// Poke `user_id`, in the target's group when it has one
    pub async fn send_poke(&self, target: &Target, user_id: &str) -> Result<Value> {
        let (action, params) = match target.group_id.as_deref() {
            Some(group_id) => (
                "group_poke",
                json!({ "group_id": group_id, "user_id": user_id }),
            ),
            None => ("friend_poke", json!({ "user_id": user_id })),
        };
        logging::log(
            Level::INFO,
            &format!("Send poke: {}", user_id),
            &target_label(target),
        );
        let response = self.call(target.transport.as_ref(), action, params).await?;
        Ok(result_value(response))
    }

    /// Send segments to a friend as a forward bundle
    pub async fn send_friend_forward(&self, target: &Target, items: Vec<Segment>) -> Result<Value> {
        let user_id = target.user_id()?;
        logging::log(Level::INFO, "Send friend forward message", &target.self_id);
        let response = self
            .call(
                target.transport.as_ref(),
                "send_private_forward_msg",
                json!({ "user_id": user_id, "messages": items }),
            )
            .await?;
        Ok(result_value(response))
    }

    /// Send segments to a group as a forward bundle
    pub async fn send_group_forward(&self, target: &Target, items: Vec<Segment>) -> Result<Value> {
        let group_id = target.group_id()?;
        logging::log(Level::INFO, "Send group forward message", &target.self_id);
        let response = self
            .call(
                target.transport.as_ref(),
                "send_group_forward_msg",
                json!({ "group_id": group_id, "messages": items }),
            )
            .await?;
        Ok(result_value(response))
    }

    /// Recall one or more messages. Each id is attempted independently;
    /// failures are reported per item.
    pub async fn recall_message<I, S>(&self, target: &Target, message_ids: I) -> Vec<RecallOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut outcomes = Vec::new();
        for message_id in message_ids.into_iter().map(Into::into) {
            logging::log(
                Level::INFO,
                &format!("Recall message: {}", message_id),
                &target.self_id,
            );
            let outcome = self
                .call(
                    target.transport.as_ref(),
                    "delete_msg",
                    json!({ "message_id": message_id }),
                )
                .await;
            outcomes.push(match outcome {
                Ok(_) => RecallOutcome {
                    success: true,
                    message_id,
                    error: None,
                },
                Err(e) => RecallOutcome {
                    success: false,
                    message_id,
                    error: Some(e.to_string()),
                },
            });
        }
        outcomes
    }

    /// Parse an inbound platform message into segments
    pub fn parse_inbound(&self, message: &Value) -> Vec<Segment> {
        parse_inbound(message)
    }

    fn set_state(&self, state: AdapterState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    async fn handle_frame(&self, transport: Arc<dyn Transport>, frame: &str) {
        logging::log(
            Level::DEBUG,
            &format!("Received frame: {}", frame),
            &self.id,
        );

        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(source = %self.id, connection = %transport.id(), "Invalid frame: {}", e);
                return;
            }
        };

        if value.get("echo").is_some_and(|echo| !echo.is_null()) {
            if let Ok(response) = ApiResponse::from_value(value) {
                self.channel.resolve(response).await;
            }
            return;
        }

        let self_id = value.get("self_id").map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        if let Some(self_id) = &self_id {
            self.bots
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(self_id.clone(), transport.clone());
        }

        let Some(events) = &self.events else {
            return;
        };
        let event = InboundEvent {
            adapter: self.id.clone(),
            connection: transport.id().to_string(),
            self_id,
            post_type: value
                .get("post_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            message: value.get("message").map(parse_inbound).unwrap_or_default(),
            raw: value,
        };
        // Never wait on the consumer: responses share this read path
        match events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    source = %self.id,
                    post_type = %event.post_type,
                    "Event queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(source = %self.id, "Event receiver dropped");
            }
        }
    }
}

#[async_trait]
impl FrameHandler for Tasker {
    async fn on_frame(&self, transport: Arc<dyn Transport>, frame: &str) {
        if self.state() == AdapterState::Destroyed {
            return;
        }
        if self.state() == AdapterState::Loaded {
            self.set_state(AdapterState::Active);
        }
        self.handle_frame(transport, frame).await;
    }
}

#[async_trait]
impl Adapter for Tasker {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn state(&self) -> AdapterState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    async fn load(self: Arc<Self>, handlers: &HandlerTable) -> Result<()> {
        if self.state() == AdapterState::Destroyed {
            return Err(Error::Adapter(format!("Tasker \"{}\" is destroyed", self.name)));
        }
        handlers.register(&self.path, self.clone()).await;
        if self.state() == AdapterState::Unregistered {
            self.set_state(AdapterState::Loaded);
        }
        tracing::info!(source = %self.id, path = %self.path, "Tasker \"{}\" loaded", self.name);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let settled = match self.destroy_policy {
            DestroyPolicy::Drain => self.channel.clear().await,
            DestroyPolicy::Reject => self.channel.reject_all().await,
        };
        self.bots.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.set_state(AdapterState::Destroyed);
        tracing::info!(
            source = %self.id,
            pending = settled,
            policy = ?self.destroy_policy,
            "Tasker \"{}\" unloaded",
            self.name
        );
        Ok(())
    }
}

enum Scope<'a> {
    Friend(&'a str),
    Group(&'a str),
}

/// Send operations bound to one target
struct Route<'a> {
    tasker: &'a Tasker,
    target: &'a Target,
    scope: Scope<'a>,
}

#[async_trait]
impl SendTarget for Route<'_> {
    async fn send_direct(&self, segments: Vec<Segment>) -> Result<Value> {
        let rendered = serde_json::to_string(&segments).unwrap_or_default();
        let (action, params, label) = match self.scope {
            Scope::Friend(user_id) => (
                "send_private_msg",
                json!({ "user_id": user_id, "message": segments }),
                "friend",
            ),
            Scope::Group(group_id) => (
                "send_group_msg",
                json!({ "group_id": group_id, "message": segments }),
                "group",
            ),
        };
        logging::log(
            Level::INFO,
            &format!("Send {} message: {}", label, rendered),
            &target_label(self.target),
        );
        let response = self
            .tasker
            .call(self.target.transport.as_ref(), action, params)
            .await?;
        Ok(result_value(response))
    }

    async fn send_forward(&self, items: Vec<Segment>) -> Result<Value> {
        match self.scope {
            Scope::Friend(_) => self.tasker.send_friend_forward(self.target, items).await,
            Scope::Group(_) => self.tasker.send_group_forward(self.target, items).await,
        }
    }
}

fn target_label(target: &Target) -> String {
    let peer = target
        .group_id
        .as_deref()
        .or(target.user_id.as_deref())
        .unwrap_or("?");
    format!("{} => {}", target.self_id, peer)
}

/// Caller-facing result of one call: the `data` object when the response
/// has one, else the envelope.
fn result_value(response: ApiResponse) -> Value {
    match response.data() {
        Some(data @ Value::Object(_)) => {
            let mut data = data.clone();
            if message_id(&data).is_none() {
                if let Some(id) = response.get("message_id") {
                    data["message_id"] = id.clone();
                }
            }
            data
        }
        Some(Value::Array(items)) => Value::Array(items.clone()),
        _ => response.into_value(),
    }
}
