mod connector;
mod events;
mod reader;

use std::collections::BTreeSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use protocol::PlatformConfig;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub use connector::{Connector, TcpConnector};
pub(crate) use events::SessionEvent;

use crate::completion::Completions;
use crate::registry::{CallId, Registry};
use crate::settings::Settings;
use crate::Error;

struct Connection<S> {
    writer: WriteHalf<S>,
    reader: JoinHandle<()>,
    generation: u64,
    delivered: Arc<AtomicBool>,
}

/// Owns the connection to the platform. Runs as a single task: every write
/// and every connect happens here, responses are read by a companion task per
/// connection.
pub(crate) struct TransportSession<C: Connector> {
    config: Arc<PlatformConfig>,
    settings: Settings,
    connector: C,
    registry: Arc<Registry>,
    events: UnboundedReceiver<SessionEvent>,
    sender: UnboundedSender<SessionEvent>,
    connection: Option<Connection<C::Stream>>,
    generation: u64,
    // Connection attempts since a connection last delivered a valid frame.
    attempt: u32,
    // Calls written to the platform that may need resending.
    unacked: BTreeSet<CallId>,
    completions: Completions,
}

impl<C: Connector> TransportSession<C> {
    pub fn new(
        config: Arc<PlatformConfig>,
        settings: Settings,
        connector: C,
        registry: Arc<Registry>,
        events: UnboundedReceiver<SessionEvent>,
        sender: UnboundedSender<SessionEvent>,
        completions: Completions,
    ) -> Self {
        Self {
            config,
            settings,
            connector,
            registry,
            events,
            sender,
            connection: None,
            generation: 0,
            attempt: 0,
            unacked: BTreeSet::new(),
            completions,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Session for {} started", self.config.address());

        while !*shutdown.borrow_and_update() {
            let step = async {
                match self.events.recv().await {
                    Some(event) => {
                        self.handle_event(event).await;
                        true
                    }
                    None => false,
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                running = step => {
                    if !running {
                        break;
                    }
                }
            }
        }

        self.close().await;
        info!("Session for {} stopped", self.config.address());
    }

    fn is_current(&self, generation: u64) -> bool {
        self.connection.as_ref().map(|c| c.generation) == Some(generation)
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Dispatch { id } => self.dispatch(id).await,
            SessionEvent::ConnectionLost { generation, reason } => {
                if !self.is_current(generation) {
                    debug!("Ignoring loss of stale connection {}", generation);
                    return;
                }

                warn!("Connection {} to {} lost: {}", generation, self.config.address(), reason);
                self.disconnect();
                self.reconnect().await;
            }
            SessionEvent::CorruptStream { generation, reason } => {
                if !self.is_current(generation) {
                    debug!("Ignoring corrupt stale connection {}", generation);
                    return;
                }

                self.disconnect();
                let sent: Vec<CallId> = std::mem::take(&mut self.unacked).into_iter().collect();
                let failed = self.fail(sent, || Error::Decode(reason.clone()));
                error!(
                    "Connection {} to {} dropped: {}, failing {} calls",
                    generation,
                    self.config.address(),
                    reason,
                    failed
                );
            }
        }
    }

    async fn dispatch(&mut self, id: CallId) {
        let Some(frame) = self.registry.frame(id) else {
            debug!("Call {} settled before dispatch", id);
            return;
        };

        self.registry.retain_pending(&mut self.unacked);
        self.unacked.insert(id);

        let written = match self.connection.as_mut() {
            Some(connection) => connection.writer.write_all(&frame).await,
            None => {
                // The fresh connection picks the call up from `unacked`.
                self.reconnect().await;
                return;
            }
        };

        match written {
            Ok(()) => debug!("Dispatched call {} ({} bytes)", id, frame.len()),
            Err(e) => {
                warn!("Writing call {} failed: {}", id, e);
                self.disconnect();
                self.reconnect().await;
            }
        }
    }

    /// Connects with exponential backoff and resends every call still
    /// pending. Connections that close before delivering a valid frame count
    /// as failed attempts; after `reconnect_attempts` retries the pending
    /// calls fail.
    async fn reconnect(&mut self) {
        let mut reason = String::from("no connection delivered a response");

        loop {
            self.registry.retain_pending(&mut self.unacked);

            if self.attempt > 0 {
                if self.attempt > self.settings.reconnect_attempts {
                    self.attempt = 0;
                    self.give_up(reason);
                    return;
                }

                let delay = self.settings.backoff(self.attempt);
                warn!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    self.config.address(),
                    delay,
                    self.attempt,
                    self.settings.reconnect_attempts
                );
                tokio::time::sleep(delay).await;
            }
            self.attempt += 1;

            if let Err(e) = self.open().await {
                warn!("Connecting to {} failed: {}", self.config.address(), e);
                reason = e;
                continue;
            }

            match self.flush().await {
                Ok(0) => return,
                Ok(sent) => {
                    info!("Sent {} pending calls on connection {}", sent, self.generation);
                    return;
                }
                Err(e) => {
                    warn!("Resending pending calls failed: {}", e);
                    reason = e.to_string();
                    self.disconnect();
                }
            }
        }
    }

    async fn open(&mut self) -> Result<(), String> {
        let connect = self.connector.connect(&self.config);
        let stream = match timeout(self.settings.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => return Err(format!("no answer within {:?}", self.settings.connect_timeout)),
        };

        let (reader, writer) = tokio::io::split(stream);
        let delivered = Arc::new(AtomicBool::new(false));
        self.generation += 1;

        let reader = tokio::spawn(reader::read_responses(
            reader,
            self.registry.clone(),
            self.completions.clone(),
            self.sender.clone(),
            self.generation,
            delivered.clone(),
        ));

        self.connection = Some(Connection {
            writer,
            reader,
            generation: self.generation,
            delivered,
        });

        info!("Connected to {} (connection {})", self.config.address(), self.generation);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<usize> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(0);
        };

        let frames = self.registry.frames(&self.unacked);
        for (id, frame) in &frames {
            connection.writer.write_all(frame).await?;
            debug!("Sent call {} ({} bytes)", id, frame.len());
        }

        Ok(frames.len())
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.reader.abort();
            if connection.delivered.load(Ordering::Acquire) {
                self.attempt = 0;
            }
            debug!("Dropped connection {}", connection.generation);
        }
    }

    fn give_up(&mut self, reason: String) {
        let mut ids: Vec<CallId> = std::mem::take(&mut self.unacked).into_iter().collect();

        // Dispatches queued behind the failed attempts would only repeat them.
        while let Ok(event) = self.events.try_recv() {
            if let SessionEvent::Dispatch { id } = event {
                ids.push(id);
            }
        }

        let failed = self.fail(ids, || Error::Transport(reason.clone()));
        error!(
            "Unable to reach {} ({}), failed {} calls",
            self.config.address(),
            reason,
            failed
        );
    }

    fn fail(&self, ids: Vec<CallId>, error: impl Fn() -> Error) -> usize {
        let calls = self.registry.take_all(ids);
        let failed = calls.len();
        for call in calls {
            call.resolve(&self.completions, Err(error()));
        }
        failed
    }

    async fn close(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            let _ = connection.writer.shutdown().await;
        }
        self.disconnect();
        self.unacked.clear();
    }
}
