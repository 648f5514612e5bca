// websocket-client/src/driver.rs
//! Client-side owner of one live connection.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──opened──▶ Open
//!                      │ failed              │ lost / closed
//!                      ▼                     ▼
//!                 Reconnecting ◀─────── (failures < max)
//!                      │ delay elapsed
//!                      └──────▶ Connecting
//! any ──failures == max / disconnect(false)──▶ Stopped
//! ```
//!
//! All transitions and listener dispatch happen inside the actor, so they
//! never interleave. Listeners that want to call back into the driver use a
//! [`DriverHandle`]; those calls queue behind the current dispatch.

use actix::{
    Actor, ActorContext, Addr, AsyncContext, Context, Handler, MailboxError, Message, MessageResult,
    SpawnHandle,
};
use common::ClientConfig;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::error::DriverError;
use crate::listeners::{DriverEvent, EventCategory, Listener, ListenerId, ListenerRegistry};
use crate::transport::{Connector, Outbound, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting,
    Stopped,
}

/// Fixed delay between attempts and a cap on consecutive failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(3000),
            max_attempts: 5,
        }
    }
}

impl From<&ClientConfig> for ReconnectPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

/// Actor message: Start connecting with `token`; a no-op while already active
#[derive(Message)]
#[rtype(result = "Result<(), DriverError>")]
pub struct Connect {
    pub token: String,
}

/// Actor message: Close the connection, optionally letting the reconnect policy continue
#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub allow_reconnect: bool,
}

#[derive(Message)]
#[rtype(result = "ListenerId")]
pub struct Subscribe {
    pub category: EventCategory,
    pub listener: Listener,
}

#[derive(Message)]
#[rtype(result = "bool")]
pub struct Unsubscribe {
    pub category: EventCategory,
    pub id: ListenerId,
}

#[derive(Message)]
#[rtype(result = "DriverState")]
pub struct GetState;

/// Actor message: Write an object frame to the open connection
#[derive(Message)]
#[rtype(result = "Result<(), DriverError>")]
pub struct SendFrame {
    pub frame: Map<String, Value>,
}

// Transport reports, tagged with the attempt they belong to

#[derive(Message)]
#[rtype(result = "()")]
struct TransportOpened {
    generation: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

#[derive(Message)]
#[rtype(result = "()")]
struct TransportFrame {
    generation: u64,
    data: Vec<u8>,
}

#[derive(Message)]
#[rtype(result = "()")]
struct TransportLost {
    generation: u64,
    event: TransportEvent,
}

/// Connection driver actor.
///
/// `failures` counts consecutive failed attempts and lost connections; it
/// resets only when a transport actually opens.
pub struct ConnectionDriver {
    endpoint: Url,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: DriverState,
    token: Option<String>,
    should_reconnect: bool,
    failures: u32,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    pending_reconnect: Option<SpawnHandle>,
    listeners: ListenerRegistry,
}

impl ConnectionDriver {
    pub fn new(
        endpoint: &str,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> Result<Self, DriverError> {
        let endpoint = Url::parse(endpoint).map_err(|e| DriverError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

        Ok(Self {
            endpoint,
            connector,
            policy,
            state: DriverState::Idle,
            token: None,
            should_reconnect: true,
            failures: 0,
            generation: 0,
            outbound: None,
            pending_reconnect: None,
            listeners: ListenerRegistry::new(),
        })
    }

    /// Start the actor and return a handle to it
    pub fn spawn(self) -> DriverHandle {
        DriverHandle { addr: self.start() }
    }

    fn connect_url(&self, token: &str) -> String {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", token);
        url.to_string()
    }

    fn open_transport(&mut self, ctx: &mut Context<Self>) {
        let Some(token) = self.token.clone() else {
            self.state = DriverState::Stopped;
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        self.state = DriverState::Connecting;

        let url = self.connect_url(&token);
        let connector = Arc::clone(&self.connector);
        let addr = ctx.address();

        tracing::info!("Opening connection to {} (attempt {})", self.endpoint, self.failures + 1);

        actix::spawn(async move {
            match connector.open(&url).await {
                Ok(link) => {
                    let mut inbound = link.inbound;
                    addr.do_send(TransportOpened {
                        generation,
                        outbound: link.outbound,
                    });

                    while let Some(event) = inbound.recv().await {
                        match event {
                            TransportEvent::Frame(data) => addr.do_send(TransportFrame { generation, data }),
                            terminal => {
                                addr.do_send(TransportLost { generation, event: terminal });
                                return;
                            },
                        }
                    }

                    addr.do_send(TransportLost {
                        generation,
                        event: TransportEvent::Closed {
                            code: None,
                            reason: "transport dropped".to_string(),
                        },
                    });
                },
                Err(e) => {
                    addr.do_send(TransportLost {
                        generation,
                        event: TransportEvent::Error(e.to_string()),
                    });
                },
            }
        });
    }

    fn cancel_pending_reconnect(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.pending_reconnect.take() {
            ctx.cancel_future(handle);
            tracing::debug!("Cancelled pending reconnect");
        }
    }

    fn close_transport(&mut self) -> bool {
        match self.outbound.take() {
            Some(outbound) => {
                let _ = outbound.send(Outbound::Close);
                true
            },
            None => false,
        }
    }

    fn handle_loss(&mut self, ctx: &mut Context<Self>) {
        if !self.should_reconnect {
            self.state = DriverState::Stopped;
            return;
        }

        self.failures += 1;
        if self.failures < self.policy.max_attempts {
            tracing::info!(
                "Reconnecting in {:?} ({}/{})",
                self.policy.delay,
                self.failures,
                self.policy.max_attempts
            );
            self.state = DriverState::Reconnecting;

            let handle = ctx.run_later(self.policy.delay, |act, ctx| {
                act.pending_reconnect = None;
                if act.state == DriverState::Reconnecting {
                    act.open_transport(ctx);
                }
            });
            self.pending_reconnect = Some(handle);
        } else {
            tracing::error!("Maximum reconnect attempts reached ({})", self.failures);
            self.state = DriverState::Stopped;
            self.should_reconnect = false;
            self.listeners.dispatch(&DriverEvent::Error(DriverError::ReconnectExhausted {
                attempts: self.failures,
            }));
        }
    }

    fn parse_frame(data: &[u8]) -> Result<Map<String, Value>, DriverError> {
        let text = std::str::from_utf8(data).map_err(|e| DriverError::FrameParseError(e.to_string()))?;
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(DriverError::FrameParseError("frame is not a JSON object".to_string())),
            Err(e) => Err(DriverError::FrameParseError(e.to_string())),
        }
    }
}

impl Actor for ConnectionDriver {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!("Connection driver started for {}", self.endpoint);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.close_transport();
        tracing::debug!("Connection driver stopped for {}", self.endpoint);
    }
}

impl Handler<Connect> for ConnectionDriver {
    type Result = MessageResult<Connect>;

    fn handle(&mut self, msg: Connect, ctx: &mut Self::Context) -> Self::Result {
        if msg.token.trim().is_empty() {
            tracing::error!("Token required to connect");
            return MessageResult(Err(DriverError::MissingToken));
        }

        match self.state {
            DriverState::Idle | DriverState::Stopped => {
                self.token = Some(msg.token);
                self.should_reconnect = true;
                // A manual connect gets a fresh attempt budget
                self.failures = 0;
                self.open_transport(ctx);
            },
            state => {
                tracing::debug!("Connect ignored while {:?}", state);
            },
        }
        MessageResult(Ok(()))
    }
}

impl Handler<Disconnect> for ConnectionDriver {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, ctx: &mut Self::Context) -> Self::Result {
        self.should_reconnect = msg.allow_reconnect;

        if msg.allow_reconnect {
            // Close and let the loss go through the reconnect policy
            if self.state == DriverState::Open && self.close_transport() {
                tracing::info!("Closing connection, reconnect allowed");
                self.state = DriverState::Closing;
            }
            return;
        }

        self.cancel_pending_reconnect(ctx);
        // Reports from the current attempt are now stale
        self.generation += 1;

        // A Closing transport was seen open and its close report is about to go stale
        let was_open = matches!(self.state, DriverState::Open | DriverState::Closing);
        self.close_transport();
        self.state = DriverState::Stopped;
        tracing::info!("Connection closed by client");

        if was_open {
            self.listeners.dispatch(&DriverEvent::Closed {
                code: Some(1000),
                reason: "client closed connection".to_string(),
            });
        }
    }
}

impl Handler<Subscribe> for ConnectionDriver {
    type Result = MessageResult<Subscribe>;

    fn handle(&mut self, msg: Subscribe, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.listeners.on(msg.category, msg.listener))
    }
}

impl Handler<Unsubscribe> for ConnectionDriver {
    type Result = MessageResult<Unsubscribe>;

    fn handle(&mut self, msg: Unsubscribe, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.listeners.off(msg.category, msg.id))
    }
}

impl Handler<GetState> for ConnectionDriver {
    type Result = MessageResult<GetState>;

    fn handle(&mut self, _msg: GetState, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.state)
    }
}

impl Handler<SendFrame> for ConnectionDriver {
    type Result = MessageResult<SendFrame>;

    fn handle(&mut self, msg: SendFrame, _ctx: &mut Self::Context) -> Self::Result {
        let result = match (&self.state, &self.outbound) {
            (DriverState::Open, Some(outbound)) => {
                let text = Value::Object(msg.frame).to_string();
                outbound
                    .send(Outbound::Text(text))
                    .map_err(|_| DriverError::NotConnected)
            },
            _ => Err(DriverError::NotConnected),
        };
        MessageResult(result)
    }
}

impl Handler<TransportOpened> for ConnectionDriver {
    type Result = ();

    fn handle(&mut self, msg: TransportOpened, _ctx: &mut Self::Context) -> Self::Result {
        if msg.generation != self.generation || self.state != DriverState::Connecting {
            // Opened after a disconnect; close it straight away
            let _ = msg.outbound.send(Outbound::Close);
            return;
        }

        tracing::info!("Connected to {}", self.endpoint);
        self.state = DriverState::Open;
        self.failures = 0;
        self.outbound = Some(msg.outbound);
        self.listeners.dispatch(&DriverEvent::Opened);
    }
}

impl Handler<TransportFrame> for ConnectionDriver {
    type Result = ();

    fn handle(&mut self, msg: TransportFrame, _ctx: &mut Self::Context) -> Self::Result {
        if msg.generation != self.generation {
            return;
        }

        match Self::parse_frame(&msg.data) {
            Ok(frame) => {
                self.listeners.dispatch(&DriverEvent::Message(frame));
            },
            Err(e) => {
                tracing::warn!("Dropping frame ({} bytes): {}", msg.data.len(), e);
            },
        }
    }
}

impl Handler<TransportLost> for ConnectionDriver {
    type Result = ();

    fn handle(&mut self, msg: TransportLost, ctx: &mut Self::Context) -> Self::Result {
        if msg.generation != self.generation {
            return;
        }
        self.outbound = None;

        let event = match msg.event {
            TransportEvent::Error(reason) => {
                tracing::warn!("Transport error: {}", reason);
                DriverEvent::Error(DriverError::TransportError(reason))
            },
            TransportEvent::Closed { code, reason } => {
                tracing::info!("Connection closed: code={:?} reason={:?}", code, reason);
                DriverEvent::Closed { code, reason }
            },
            TransportEvent::Frame(_) => return,
        };
        self.listeners.dispatch(&event);

        self.handle_loss(ctx);
    }
}

/// Cloneable handle for talking to a running [`ConnectionDriver`]
#[derive(Clone)]
pub struct DriverHandle {
    addr: Addr<ConnectionDriver>,
}

fn mailbox(e: MailboxError) -> DriverError {
    DriverError::TransportError(format!("driver unavailable: {}", e))
}

impl DriverHandle {
    pub fn addr(&self) -> &Addr<ConnectionDriver> {
        &self.addr
    }

    pub async fn connect(&self, token: impl Into<String>) -> Result<(), DriverError> {
        self.addr.send(Connect { token: token.into() }).await.map_err(mailbox)?
    }

    pub async fn disconnect(&self, allow_reconnect: bool) -> Result<(), DriverError> {
        self.addr.send(Disconnect { allow_reconnect }).await.map_err(mailbox)
    }

    pub async fn on<F>(&self, category: EventCategory, listener: F) -> Result<ListenerId, DriverError>
    where
        F: Fn(&DriverEvent) + Send + 'static,
    {
        let msg = Subscribe {
            category,
            listener: Box::new(listener),
        };
        self.addr.send(msg).await.map_err(mailbox)
    }

    pub async fn off(&self, category: EventCategory, id: ListenerId) -> Result<bool, DriverError> {
        self.addr.send(Unsubscribe { category, id }).await.map_err(mailbox)
    }

    pub async fn state(&self) -> Result<DriverState, DriverError> {
        self.addr.send(GetState).await.map_err(mailbox)
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.state().await, Ok(DriverState::Open))
    }

    pub async fn send(&self, frame: Map<String, Value>) -> Result<(), DriverError> {
        self.addr.send(SendFrame { frame }).await.map_err(mailbox)?
    }

    /// Stop the actor entirely; the handle is unusable afterwards
    pub fn shutdown(&self) {
        self.addr.do_send(Shutdown);
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct Shutdown;

impl Handler<Shutdown> for ConnectionDriver {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        self.should_reconnect = false;
        self.cancel_pending_reconnect(ctx);
        ctx.stop();
    }
}
