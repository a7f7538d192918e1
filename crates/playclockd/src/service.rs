//! Daemon wiring: store, engine, scheduler, registry, and IPC dispatch

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use playclock_api::{
    Command, Connectivity, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus, Response,
    ResponsePayload, API_VERSION,
};
use playclock_config::Config;
use playclock_core::{
    DeadlineQueue, DeviceRegistry, ExpiryScheduler, Notice, Notifier, SessionEngine,
};
use playclock_ipc::{IpcServer, ServerMessage};
use playclock_store::Store;
use playclock_util::{ClientId, Clock, PlayclockError, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Requests allowed per client per second
const RATE_LIMIT_MAX: u32 = 30;

/// The assembled daemon.
///
/// Construction seeds the device catalog, recovers deadlines for sessions
/// that survived a restart, and binds the socket. [`Service::start`] then
/// spawns the background tasks; commands flow from the IPC server through
/// [`Service::handle_ipc_message`].
pub struct Service {
    store: Arc<dyn Store>,
    engine: Arc<SessionEngine>,
    registry: Arc<DeviceRegistry>,
    scheduler: Arc<ExpiryScheduler>,
    notifier: Notifier,
    ipc: Arc<IpcServer>,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    clock: Arc<dyn Clock>,
}

/// Handles to the daemon's background tasks, used for graceful shutdown
pub struct ServiceTasks {
    shutdown_tx: watch::Sender<bool>,
    accept: JoinHandle<()>,
    scheduler: JoinHandle<()>,
    bridge: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

impl Service {
    pub async fn new(
        config: &Config,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let notifier = Notifier::default();
        let deadlines = Arc::new(DeadlineQueue::new());

        let engine = Arc::new(SessionEngine::new(
            store.clone(),
            notifier.clone(),
            deadlines.clone(),
        ));
        let registry = Arc::new(DeviceRegistry::new(store.clone(), notifier.clone()));

        registry.seed(&config.devices)?;
        engine.recover(clock.now())?;

        let scheduler = Arc::new(ExpiryScheduler::new(
            engine.clone(),
            deadlines,
            clock.clone(),
            config.service.tick_interval,
        ));

        let mut ipc = IpcServer::new(&config.service.socket_path);
        ipc.start().await.with_context(|| {
            format!(
                "Failed to bind socket {:?}",
                config.service.socket_path
            )
        })?;

        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(
            RATE_LIMIT_MAX,
            Duration::from_secs(1),
        )));

        Ok(Self {
            store,
            engine,
            registry,
            scheduler,
            notifier,
            ipc: Arc::new(ipc),
            rate_limiter,
            clock,
        })
    }

    /// Spawn the accept loop, expiry scheduler, notice bridge, and command
    /// dispatch. Returns the task handles for [`Service::stop`].
    pub async fn start(self: Arc<Self>) -> Result<ServiceTasks> {
        let mut messages = self
            .ipc
            .take_message_receiver()
            .await
            .context("Message receiver already taken")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Accept loop
        let ipc = self.ipc.clone();
        let accept = tokio::spawn(async move {
            if let Err(e) = ipc.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        // Expiry scheduler
        let scheduler = tokio::spawn(self.scheduler.clone().run(shutdown_rx));

        // Engine notices out to connected clients
        let bridge = tokio::spawn(Self::bridge_notices(
            self.notifier.subscribe(),
            self.ipc.clone(),
        ));

        // Command dispatch
        let service = self.clone();
        let dispatch = tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                service.handle_ipc_message(msg).await;
            }
        });

        info!("Service running");

        Ok(ServiceTasks {
            shutdown_tx,
            accept,
            scheduler,
            bridge,
            dispatch,
        })
    }

    /// Graceful shutdown: announce, stop the scheduler, release the socket
    pub async fn stop(&self, tasks: ServiceTasks) {
        info!("Shutting down playclockd");

        self.ipc.broadcast_event(Event::new(EventPayload::Shutdown));
        // One beat for connection writers to flush the announcement
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = tasks.shutdown_tx.send(true);
        let _ = tasks.scheduler.await;
        tasks.accept.abort();
        tasks.dispatch.abort();
        tasks.bridge.abort();

        self.ipc.shutdown();
        info!("Shutdown complete");
    }

    /// Forward engine notices to the IPC event stream
    async fn bridge_notices(mut notices: broadcast::Receiver<Notice>, ipc: Arc<IpcServer>) {
        loop {
            match notices.recv().await {
                Ok(notice) => {
                    let payload = match notice {
                        Notice::DeviceChanged { device_id } => {
                            EventPayload::DeviceChanged { device_id }
                        }
                        Notice::TimeOver { device_id } => EventPayload::TimeOver { device_id },
                    };
                    ipc.broadcast_event(Event::new(payload));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Clients re-fetch on the next notice; dropped ones only
                    // cost staleness, not correctness
                    warn!(skipped, "Notice bridge lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pub async fn handle_ipc_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                if request.api_version != API_VERSION {
                    let response = Response::error(
                        request.request_id,
                        ErrorInfo::new(
                            ErrorCode::InvalidRequest,
                            format!(
                                "Unsupported API version {} (daemon speaks {})",
                                request.api_version, API_VERSION
                            ),
                        ),
                    );
                    let _ = self.ipc.send_response(&client_id, response).await;
                    return;
                }

                {
                    let mut limiter = self.rate_limiter.lock().await;
                    if !limiter.check(&client_id) {
                        let response = Response::error(
                            request.request_id,
                            ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                        );
                        let _ = self.ipc.send_response(&client_id, response).await;
                        return;
                    }
                }

                let response = self
                    .handle_command(&client_id, request.request_id, request.command)
                    .await;
                let _ = self.ipc.send_response(&client_id, response).await;
            }

            ServerMessage::ClientConnected { client_id } => {
                debug!(client_id = %client_id, "Client connected");
            }

            ServerMessage::ClientDisconnected { client_id, device } => {
                debug!(client_id = %client_id, "Client disconnected");

                // A vanished lock client means its terminal is unreachable
                if let Some(device_id) = device {
                    if let Err(e) = self.registry.set_connectivity(
                        &device_id,
                        Connectivity::Offline,
                        self.clock.now(),
                    ) {
                        warn!(
                            device_id = %device_id,
                            error = %e,
                            "Failed to mark device offline"
                        );
                    }
                }

                let mut limiter = self.rate_limiter.lock().await;
                limiter.remove_client(&client_id);
            }
        }
    }

    async fn handle_command(
        &self,
        client_id: &ClientId,
        request_id: u64,
        command: Command,
    ) -> Response {
        let now = self.clock.now();

        match self.dispatch(client_id, command, now).await {
            Ok(payload) => Response::success(request_id, payload),
            Err(e) => Response::error(request_id, ErrorInfo::new(error_code(&e), e.to_string())),
        }
    }

    async fn dispatch(
        &self,
        client_id: &ClientId,
        command: Command,
        now: DateTime<Utc>,
    ) -> std::result::Result<ResponsePayload, PlayclockError> {
        match command {
            Command::StartSession {
                device_id,
                duration_minutes,
                amount,
            } => {
                let session = self
                    .engine
                    .start(&device_id, duration_minutes, amount, now)
                    .await?;
                Ok(ResponsePayload::Session(session))
            }

            Command::AddTime {
                device_id,
                extra_minutes,
            } => {
                let session = self.engine.add_time(&device_id, extra_minutes, now).await?;
                Ok(ResponsePayload::Session(session))
            }

            Command::PauseSession { device_id } => {
                let session = self.engine.pause(&device_id, now).await?;
                Ok(ResponsePayload::Session(session))
            }

            Command::ResumeSession { device_id } => {
                let session = self.engine.resume(&device_id, now).await?;
                Ok(ResponsePayload::Session(session))
            }

            Command::EndSession { device_id } => {
                let session = self.engine.end(&device_id).await?;
                Ok(ResponsePayload::Session(session))
            }

            Command::ListDevices => Ok(ResponsePayload::Devices {
                devices: self.registry.views(now)?,
            }),

            Command::GetDevice { device_id } => {
                Ok(ResponsePayload::Device(self.registry.view(&device_id, now)?))
            }

            Command::ListSessions { limit } => Ok(ResponsePayload::Sessions {
                sessions: self.store.list_sessions(limit)?,
            }),

            Command::RegisterDevice { device_id } => {
                let device =
                    self.registry
                        .set_connectivity(&device_id, Connectivity::Online, now)?;
                self.ipc.bind_device(client_id, &device_id).await;
                let session = self.store.current_session(&device_id)?;

                info!(
                    client_id = %client_id,
                    device_id = %device_id,
                    has_session = session.is_some(),
                    "Device client registered"
                );

                Ok(ResponsePayload::Registered { device, session })
            }

            Command::Heartbeat { device_id } => {
                self.registry
                    .set_connectivity(&device_id, Connectivity::Online, now)?;
                Ok(ResponsePayload::HeartbeatAck)
            }

            Command::SubscribeEvents => Ok(ResponsePayload::Subscribed {
                client_id: *client_id,
            }),

            Command::UnsubscribeEvents => Ok(ResponsePayload::Unsubscribed),

            Command::GetHealth => {
                let store_ok = self.store.is_healthy();
                let device_count = self.store.list_devices()?.len();
                let active_sessions = self.store.active_sessions()?.len();

                Ok(ResponsePayload::Health(HealthStatus {
                    live: true,
                    ready: store_ok,
                    store_ok,
                    device_count,
                    active_sessions,
                }))
            }

            Command::Ping => Ok(ResponsePayload::Pong),
        }
    }
}

/// Protocol error code for an engine error
fn error_code(err: &PlayclockError) -> ErrorCode {
    match err {
        PlayclockError::DeviceNotFound(_) => ErrorCode::DeviceNotFound,
        PlayclockError::SessionNotFound(_) => ErrorCode::SessionNotFound,
        PlayclockError::SessionConflict(_) => ErrorCode::SessionConflict,
        PlayclockError::InvalidState(_) => ErrorCode::InvalidState,
        PlayclockError::ValidationError(_) | PlayclockError::ConfigError(_) => {
            ErrorCode::InvalidRequest
        }
        PlayclockError::RateLimited => ErrorCode::RateLimited,
        PlayclockError::StoreError(_) => ErrorCode::StorageError,
        PlayclockError::IpcError(_) | PlayclockError::Internal(_) => ErrorCode::InternalError,
    }
}
