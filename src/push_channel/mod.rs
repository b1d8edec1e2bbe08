//! PushChannel - Server Push Client
//!
//! ## Responsibilities
//!
//! - Hold the single process-wide channel to the push server
//! - Decode `detection` / `metrics` / `zones` messages into the store
//! - Reconnect after a fixed delay on close or failed open
//! - Send `subscribe` only while open; re-announce the last subscription on open
//!
//! ## Lifecycle
//!
//! Created in `main`, started once, torn down by `shutdown()`. Channel status
//! and retry count are mirrored into the aggregate store on every transition.

mod messages;
mod reconnect;
mod transport;

pub use messages::{apply, decode, InboundMessage, OutboundMessage};
pub use reconnect::{ReconnectAction, ReconnectState, DEFAULT_RECONNECT_DELAY};
pub use transport::{ChannelConnector, MessageSink, MessageStream, WsConnector};

use crate::models::ChannelStatus;
use crate::store::AggregateStore;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner {
    url: String,
    connector: Arc<dyn ChannelConnector>,
    store: Arc<AggregateStore>,
    machine: Mutex<ReconnectState>,
    outbound_tx: mpsc::UnboundedSender<String>,
    last_subscription: Mutex<Option<Vec<String>>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Push channel client
pub struct PushChannel {
    inner: Arc<Inner>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PushChannel {
    /// Create new PushChannel (not yet connected)
    pub fn new(
        url: impl Into<String>,
        reconnect_delay: Duration,
        connector: Arc<dyn ChannelConnector>,
        store: Arc<AggregateStore>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                connector,
                store,
                machine: Mutex::new(ReconnectState::new(reconnect_delay)),
                outbound_tx,
                last_subscription: Mutex::new(None),
                shutdown_tx,
            }),
            outbound_rx: Mutex::new(Some(outbound_rx)),
            task: Mutex::new(None),
        }
    }

    /// Spawn the connection driver
    pub fn start(&self) {
        let Some(outbound_rx) = lock(&self.outbound_rx).take() else {
            tracing::warn!("Push channel already started");
            return;
        };

        tracing::info!(url = %self.inner.url, "Starting push channel");

        let inner = self.inner.clone();
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        *lock(&self.task) = Some(tokio::spawn(async move {
            inner.run(outbound_rx, shutdown_rx).await
        }));
    }

    /// Ask the server for updates about `cameras`
    ///
    /// Sent only while the channel is open; otherwise dropped. The list is
    /// remembered either way and re-announced when the channel next opens.
    pub fn subscribe(&self, cameras: Vec<String>) -> bool {
        *lock(&self.inner.last_subscription) = Some(cameras.clone());

        if self.status() != ChannelStatus::Open {
            tracing::debug!(cameras = cameras.len(), "Channel not open, subscribe dropped");
            return false;
        }

        match (OutboundMessage::Subscribe { cameras }).to_text() {
            Ok(text) => self.inner.outbound_tx.send(text).is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode subscribe message");
                false
            }
        }
    }

    pub fn status(&self) -> ChannelStatus {
        lock(&self.inner.machine).status()
    }

    pub fn retry_count(&self) -> u32 {
        lock(&self.inner.machine).retry_count()
    }

    /// Explicit teardown: close the connection and cancel any reconnect
    pub async fn shutdown(&self) {
        self.inner.transition(|m| m.shutdown());
        self.inner.shutdown_tx.send_replace(true);

        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Push channel task ended abnormally");
            }
        }
        tracing::info!("Push channel shut down");
    }
}

impl Inner {
    fn transition(&self, f: impl FnOnce(&mut ReconnectState) -> ReconnectAction) -> ReconnectAction {
        let (action, status, retries) = {
            let mut machine = lock(&self.machine);
            let action = f(&mut machine);
            (action, machine.status(), machine.retry_count())
        };
        self.store.set_channel_state(status, retries);
        action
    }

    async fn run(
        self: Arc<Self>,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut action = self.transition(|m| m.start());

        loop {
            match action {
                ReconnectAction::Connect => {
                    let connected = tokio::select! {
                        res = self.connector.connect(&self.url) => res,
                        _ = shutdown_rx.changed() => break,
                    };

                    match connected {
                        Ok((sink, stream)) => {
                            self.transition(|m| m.on_open());
                            tracing::info!(url = %self.url, "Push channel open");
                            self.session(sink, stream, &mut outbound_rx, &mut shutdown_rx)
                                .await;
                        }
                        Err(e) => {
                            tracing::warn!(url = %self.url, error = %e, "Push channel connect failed");
                        }
                    }

                    action = self.transition(|m| m.on_close());
                }
                ReconnectAction::ScheduleReconnect(delay) => {
                    tracing::info!(
                        delay_ms = delay.as_millis() as u64,
                        retry_count = lock(&self.machine).retry_count(),
                        "Push channel closed, reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                    action = self.transition(|m| m.on_timer());
                }
                ReconnectAction::CancelTimer | ReconnectAction::Idle => break,
            }
        }

        tracing::debug!("Push channel driver exited");
    }

    /// Pump one open connection until it closes or teardown is requested
    async fn session(
        &self,
        mut sink: MessageSink,
        mut stream: MessageStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        // Sends from a previous session are not carried over
        while outbound_rx.try_recv().is_ok() {}

        let announce = lock(&self.last_subscription).clone();
        if let Some(cameras) = announce {
            match (OutboundMessage::Subscribe { cameras }).to_text() {
                Ok(text) => {
                    if let Err(e) = sink.send(text).await {
                        tracing::warn!(error = %e, "Failed to re-announce subscription");
                        return;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to encode subscribe message"),
            }
        }

        loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(text)) => self.handle_text(&text),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Push channel error");
                        break;
                    }
                    None => {
                        tracing::info!("Push channel closed by peer");
                        break;
                    }
                },
                outbound = outbound_rx.recv() => match outbound {
                    Some(text) => {
                        if let Err(e) = sink.send(text).await {
                            tracing::warn!(error = %e, "Push channel send failed");
                            break;
                        }
                    }
                    None => break,
                },
                _ = shutdown_rx.changed() => {
                    if let Err(e) = sink.close().await {
                        tracing::debug!(error = %e, "Close handshake failed");
                    }
                    break;
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match decode(text) {
            Ok(Some(msg)) => apply(&self.store, msg),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Dropping malformed push message"),
        }
    }
}
