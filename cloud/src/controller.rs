use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use log::{debug, info, warn};
use protocol::{Message, PlatformConfig};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::watch;

use crate::call::{CallDescriptor, CloudCall};
use crate::completion::{Callback, Completions};
use crate::decoder::TypedResult;
use crate::registry::{CallId, PendingCall, Registry};
use crate::session::{Connector, SessionEvent, TcpConnector, TransportSession};
use crate::settings::Settings;
use crate::Error;

/// Entry point for remote calls. `make_call` only registers the call and
/// queues it for the session, so it is safe to call from a capture loop.
pub struct ServiceController {
    config: Arc<PlatformConfig>,
    settings: Settings,
    registry: Arc<Registry>,
    events: UnboundedSender<SessionEvent>,
    shutdown: watch::Sender<bool>,
    next_id: AtomicU64,
    handle: Handle,
    completions: Completions,
    runtime: Option<Runtime>,
}

impl ServiceController {
    pub fn new(config: PlatformConfig) -> Result<Self, Error> {
        Self::with_settings(config, Settings::default())
    }

    /// Starts a controller on its own runtime, talking TCP to the platform.
    pub fn with_settings(config: PlatformConfig, settings: Settings) -> Result<Self, Error> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(settings.worker_threads.max(1))
            .thread_name("cloud-session")
            .enable_all()
            .build()?;

        let handle = runtime.handle().clone();
        let mut controller = Self::with_connector(config, settings, TcpConnector, handle)?;
        controller.runtime = Some(runtime);
        Ok(controller)
    }

    /// Starts a controller whose session runs on `handle` and opens its
    /// connections through `connector`.
    pub fn with_connector<C: Connector>(
        config: PlatformConfig,
        settings: Settings,
        connector: C,
        handle: Handle,
    ) -> Result<Self, Error> {
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new());
        let completions = Completions::spawn()?;
        let (events, receiver) = mpsc::unbounded_channel();
        let (shutdown, stopped) = watch::channel(false);

        let session = TransportSession::new(
            config.clone(),
            settings.clone(),
            connector,
            registry.clone(),
            receiver,
            events.clone(),
            completions.clone(),
        );
        handle.spawn(session.run(stopped));

        info!("Controller for {} ready", config.address());

        Ok(Self {
            config,
            settings,
            registry,
            events,
            shutdown,
            next_id: AtomicU64::new(1),
            handle,
            completions,
            runtime: None,
        })
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Number of calls still waiting for a result.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Queues `descriptor` for dispatch and returns its id without waiting.
    /// `callback` runs exactly once on the callback thread, unless the call
    /// is cancelled first.
    pub fn make_call<F>(&self, descriptor: CallDescriptor, callback: F) -> CallId
    where
        F: FnOnce(Result<TypedResult, Error>) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (operation, payload) = descriptor.into_parts();

        let request = Message::Request {
            correlation_id: id,
            operation,
            token: self.config.token().into(),
            payload,
        };
        let frame = match request.encode() {
            Ok(frame) => Bytes::from(frame),
            Err(e) => {
                debug!("Rejected call {}: {}", id, e);
                self.completions.deliver(Box::new(callback), Err(e.into()));
                return id;
            }
        };

        let submitted_at = Instant::now();
        let deadline = submitted_at + self.settings.call_timeout;
        let call = PendingCall {
            id,
            operation,
            callback: Box::new(callback),
            frame,
            submitted_at,
            deadline,
            timer: None,
        };

        if let Err(call) = self.registry.insert(call) {
            call.resolve(&self.completions, Err(Error::Shutdown));
            return id;
        }

        self.arm_timer(id, deadline);

        if self.events.send(SessionEvent::Dispatch { id }).is_err() {
            if let Some(call) = self.registry.take(id) {
                call.resolve(&self.completions, Err(Error::Shutdown));
            }
        }

        debug!("Queued call {} ({})", id, operation);
        id
    }

    /// Typed form of [`make_call`](Self::make_call).
    pub fn call<C, F>(&self, request: C, callback: F) -> CallId
    where
        C: CloudCall + 'static,
        F: FnOnce(Result<C::Output, Error>) + Send + 'static,
    {
        let callback =
            move |result: Result<TypedResult, Error>| callback(result.and_then(C::extract));

        match request.descriptor() {
            Ok(descriptor) => self.make_call(descriptor, callback),
            Err(e) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                debug!("Rejected call {}: {}", id, e);
                let callback: Callback = Box::new(callback);
                self.completions.deliver(callback, Err(e));
                id
            }
        }
    }

    /// Withdraws a pending call. Its callback will not run. Returns `false`
    /// if the call had already been resolved.
    pub fn cancel(&self, id: CallId) -> bool {
        match self.registry.take(id) {
            Some(call) => {
                debug!("Cancelled call {} ({})", id, call.operation);
                call.discard();
                true
            }
            None => false,
        }
    }

    /// Stops the session and fails every outstanding call with
    /// [`Error::Cancelled`]. Later calls fail with [`Error::Shutdown`].
    pub fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }

        let calls = self.registry.close();
        info!(
            "Controller for {} shutting down, cancelling {} calls",
            self.config.address(),
            calls.len()
        );

        for call in calls {
            call.resolve(&self.completions, Err(Error::Cancelled));
        }
    }

    /// Resolves the call with `Timeout` at its deadline. The timer is
    /// aborted as soon as the call settles any other way.
    fn arm_timer(&self, id: CallId, deadline: Instant) {
        let registry = self.registry.clone();
        let completions = self.completions.clone();

        let timer = self.handle.spawn(async move {
            tokio::time::sleep_until(deadline.into()).await;
            if let Some(call) = registry.take(id) {
                warn!("Call {} ({}) timed out", id, call.operation);
                call.resolve(&completions, Err(Error::Timeout));
            }
        });
        self.registry.attach_timer(id, timer.abort_handle());
    }
}

impl Drop for ServiceController {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
