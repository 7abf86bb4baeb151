//! Reconnecting push-channel client
//!
//! Maintains a logically-continuous event stream over a transport that can
//! die at any time, including while the consuming process is suspended
//! (backgrounded tab) or offline. A single task owns the connection
//! lifecycle: it opens the transport, serves inbound messages, arms one
//! heartbeat deadline that every inbound message resets, and loops through
//! backoff-scheduled reconnects on any failure. Connection failures are
//! always retried unless the channel was explicitly closed; there is no
//! maximum retry count, only a maximum delay.
//!
//! External signals (network offline/online, tab hidden/visible) suspend and
//! resume the loop without marking the channel intentionally closed, so a
//! backgrounded viewer picks the stream back up where the transport can
//! resume it (`UrlBuilder` receives the last seen event id).

pub mod sse;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffScheduler;
use crate::config::ChannelConfig;
use crate::continuity::Visibility;
use crate::error::Result;

/// Connection lifecycle of one channel; the only caller-visible failure
/// signal (the UI layer may use it to show a reconnecting indicator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
    Errored,
}

/// A single inbound push-channel message.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    /// Event name; `None` routes to the default handler.
    pub event: Option<String>,
    pub data: String,
    /// Event id for resumption, when the source supplies one.
    pub id: Option<String>,
}

pub type MessageStream = Pin<Box<dyn Stream<Item = Result<ChannelMessage>> + Send>>;

/// The transport seam: SSE in production, scripted streams in tests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the push stream. Returning `Ok` is the transport's open signal;
    /// a non-2xx response or connect failure is a transport error.
    async fn connect(&self, url: &str) -> Result<MessageStream>;
}

/// Builds the connection URL from the last acknowledged event id, so a
/// resumable source can replay missed events.
pub type UrlBuilder = Arc<dyn Fn(Option<&str>) -> String + Send + Sync>;

pub type EventHandler = Arc<dyn Fn(&ChannelMessage) + Send + Sync>;

#[derive(Default)]
struct HandlerRegistry {
    named: HashMap<String, EventHandler>,
    default: Option<EventHandler>,
}

/// Resume/suspend signals from the host environment.
#[derive(Debug, Clone, Copy)]
enum Signal {
    /// Close the transport but keep the channel resumable (offline, hidden).
    Suspend,
    /// Reconnect immediately with backoff reset (online, visible).
    Resume,
}

/// A long-lived push-channel client with exponential backoff, jitter and
/// heartbeat-timeout detection.
pub struct ReconnectingChannel {
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    handlers: Arc<RwLock<HandlerRegistry>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<Signal>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectingChannel {
    #[must_use]
    pub fn new(config: ChannelConfig, transport: Arc<dyn Transport>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            config,
            transport,
            handlers: Arc::new(RwLock::new(HandlerRegistry::default())),
            state_tx,
            state_rx,
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Register a handler for a named event. Unknown event names received on
    /// the wire are ignored, not errors.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .named
            .insert(event.into(), Arc::new(handler));
    }

    /// Register the handler for unnamed messages.
    pub fn on_default<F>(&self, handler: F)
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.handlers.write().default = Some(Arc::new(handler));
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch connection state transitions (e.g. for a reconnecting indicator).
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Start the connection loop. Idempotent: calling while already
    /// connecting or open is a no-op, and a channel that was explicitly
    /// closed stays closed.
    pub fn open(&self, url_builder: UrlBuilder) {
        if self.state() == ConnectionState::Closed {
            debug!("Ignoring open() on an explicitly closed channel");
            return;
        }

        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let Some(signal_rx) = self.signal_rx.lock().take() else {
            return;
        };

        let run = RunLoop {
            transport: self.transport.clone(),
            handlers: self.handlers.clone(),
            state_tx: self.state_tx.clone(),
            signal_rx,
            cancel: self.cancel.clone(),
            url_builder,
            heartbeat_timeout: self.config.heartbeat_timeout(),
            backoff: BackoffScheduler::from_config(&self.config),
            last_event_id: None,
            suspended: false,
        };
        *task = Some(tokio::spawn(run.run()));
    }

    /// Convenience wrapper over [`open`](Self::open) for closure builders.
    pub fn open_with<F>(&self, url_builder: F)
    where
        F: Fn(Option<&str>) -> String + Send + Sync + 'static,
    {
        self.open(Arc::new(url_builder));
    }

    /// Close intentionally: no auto-reconnect follows, all timers are
    /// cancelled deterministically. By the time this returns the run loop
    /// has exited, so no handler fires and no timer is pending afterwards.
    /// Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "Push channel task ended abnormally");
            }
        }
        self.state_tx.send_replace(ConnectionState::Closed);
        info!("Push channel closed");
    }

    /// Network came back: reconnect immediately with backoff reset.
    pub fn network_online(&self) {
        debug!("Network online, forcing reconnect");
        let _ = self.signal_tx.send(Signal::Resume);
    }

    /// Network lost: force-close the transport without marking the channel
    /// intentionally closed, so it reconnects once online returns.
    pub fn network_offline(&self) {
        debug!("Network offline, suspending push channel");
        let _ = self.signal_tx.send(Signal::Suspend);
    }

    /// Tab hidden force-closes for resource conservation (resumable);
    /// visible forces an immediate reconnect with backoff reset.
    pub fn visibility_changed(&self, visibility: Visibility) {
        match visibility {
            Visibility::Hidden => {
                debug!("Tab hidden, suspending push channel");
                let _ = self.signal_tx.send(Signal::Suspend);
            }
            Visibility::Visible => {
                debug!("Tab visible, forcing reconnect");
                let _ = self.signal_tx.send(Signal::Resume);
            }
        }
    }
}

enum ServeExit {
    Cancelled,
    Suspended,
    Failed,
}

/// The single logical timeline of one channel: all timers and transitions
/// for a channel happen inside this task.
struct RunLoop {
    transport: Arc<dyn Transport>,
    handlers: Arc<RwLock<HandlerRegistry>>,
    state_tx: watch::Sender<ConnectionState>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
    cancel: CancellationToken,
    url_builder: UrlBuilder,
    heartbeat_timeout: std::time::Duration,
    backoff: BackoffScheduler,
    last_event_id: Option<String>,
    suspended: bool,
}

impl RunLoop {
    async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if self.suspended {
                self.state_tx.send_replace(ConnectionState::Reconnecting);
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    signal = self.signal_rx.recv() => {
                        if self.apply_signal(signal) {
                            break;
                        }
                    }
                }
                continue;
            }

            self.state_tx.send_replace(ConnectionState::Connecting);
            let url = (self.url_builder)(self.last_event_id.as_deref());

            let connected = tokio::select! {
                () = self.cancel.cancelled() => break,
                signal = self.signal_rx.recv() => {
                    // Abandons the in-flight connect attempt.
                    if self.apply_signal(signal) {
                        break;
                    }
                    continue;
                }
                connected = self.transport.connect(&url) => connected,
            };

            match connected {
                Ok(stream) => {
                    info!(resumed_from = ?self.last_event_id, "Push channel open");
                    self.state_tx.send_replace(ConnectionState::Open);
                    self.backoff.reset();

                    match self.serve(stream).await {
                        ServeExit::Cancelled => break,
                        ServeExit::Suspended => {
                            self.suspended = true;
                            continue;
                        }
                        ServeExit::Failed => {}
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Push channel open failed");
                    self.state_tx.send_replace(ConnectionState::Errored);
                }
            }

            // Schedule the next attempt; retried forever unless closed.
            self.state_tx.send_replace(ConnectionState::Reconnecting);
            let delay = self.backoff.next();
            debug!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.backoff.attempt(),
                "Scheduling push channel reconnect"
            );
            tokio::select! {
                () = self.cancel.cancelled() => break,
                signal = self.signal_rx.recv() => {
                    if self.apply_signal(signal) {
                        break;
                    }
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.state_tx.send_replace(ConnectionState::Closed);
    }

    /// Serve one open connection until it fails, is suspended or cancelled.
    async fn serve(&mut self, mut stream: MessageStream) -> ServeExit {
        // The heartbeat starts at connection-open and is reset by every
        // inbound message; at most one live deadline exists per channel.
        let mut deadline = Instant::now() + self.heartbeat_timeout;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return ServeExit::Cancelled,
                signal = self.signal_rx.recv() => match signal {
                    Some(Signal::Suspend) => {
                        info!("Push channel suspended");
                        return ServeExit::Suspended;
                    }
                    // Already connected; nothing to resume.
                    Some(Signal::Resume) => {}
                    None => return ServeExit::Cancelled,
                },
                () = tokio::time::sleep_until(deadline) => {
                    warn!(
                        timeout_ms = self.heartbeat_timeout.as_millis() as u64,
                        "Heartbeat timeout, forcing reconnect"
                    );
                    return ServeExit::Failed;
                }
                item = stream.next() => match item {
                    Some(Ok(message)) => {
                        deadline = Instant::now() + self.heartbeat_timeout;
                        if let Some(id) = &message.id {
                            self.last_event_id = Some(id.clone());
                        }
                        self.dispatch(&message);
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "Push channel transport error");
                        self.state_tx.send_replace(ConnectionState::Errored);
                        return ServeExit::Failed;
                    }
                    None => {
                        warn!("Push channel stream ended");
                        return ServeExit::Failed;
                    }
                }
            }
        }
    }

    fn dispatch(&self, message: &ChannelMessage) {
        let handlers = self.handlers.read();
        let handler = match &message.event {
            Some(name) => match handlers.named.get(name) {
                Some(handler) => handler.clone(),
                None => {
                    debug!(event = %name, "Ignoring unknown event");
                    return;
                }
            },
            None => match &handlers.default {
                Some(handler) => handler.clone(),
                None => return,
            },
        };
        drop(handlers);
        handler(message);
    }

    /// Returns true when the loop should stop (signal channel gone).
    fn apply_signal(&mut self, signal: Option<Signal>) -> bool {
        match signal {
            Some(Signal::Suspend) => {
                self.suspended = true;
                false
            }
            Some(Signal::Resume) => {
                self.suspended = false;
                self.backoff.reset();
                false
            }
            None => true,
        }
    }
}
