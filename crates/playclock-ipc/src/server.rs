//! IPC server implementation

use playclock_api::{Command, Event, EventPayload, Request, Response};
use playclock_util::{ClientId, DeviceId};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Message from the transport to the daemon's dispatch loop
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
    },
    ClientDisconnected {
        client_id: ClientId,
        /// The device this connection was registered for, if any
        device: Option<DeviceId>,
    },
}

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    response_tx: mpsc::UnboundedSender<String>,
    subscribed: bool,
    device: Option<DeviceId>,
}

/// Whether a client should see this event. Subscribers get everything; a
/// registered lock client additionally gets its own device's time-over.
/// Shutdown reaches every connection since the socket is about to close.
fn wants_event(subscribed: bool, device: Option<&DeviceId>, event: &Event) -> bool {
    match &event.payload {
        EventPayload::TimeOver { device_id } => subscribed || device == Some(device_id),
        EventPayload::Shutdown => true,
        _ => subscribed,
    }
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Start listening
    pub async fn start(&mut self) -> IpcResult<()> {
        // Remove existing socket if present
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        // Create parent directory if needed
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Readable and writable by owner and group only
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Get receiver for server messages
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = ClientId::new();
                    info!(client_id = %client_id, "Client connected");
                    self.handle_client(stream, client_id).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        // Register client
        {
            let mut clients = self.clients.write().await;
            clients.insert(
                client_id,
                ClientHandle {
                    response_tx,
                    subscribed: false,
                    device: None,
                },
            );
        }

        // Notify of connection
        let _ = self
            .message_tx
            .send(ServerMessage::ClientConnected { client_id });

        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();

        // Reader task: parse NDJSON requests and forward them for dispatch
        let mut reader_task = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %client_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                // Track subscription changes at the transport,
                                // so event delivery needs no dispatch round trip
                                match &request.command {
                                    Command::SubscribeEvents => {
                                        let mut clients = clients.write().await;
                                        if let Some(handle) = clients.get_mut(&client_id) {
                                            handle.subscribed = true;
                                        }
                                    }
                                    Command::UnsubscribeEvents => {
                                        let mut clients = clients.write().await;
                                        if let Some(handle) = clients.get_mut(&client_id) {
                                            handle.subscribed = false;
                                        }
                                    }
                                    _ => {}
                                }

                                let _ = message_tx.send(ServerMessage::Request {
                                    client_id,
                                    request,
                                });
                            }
                            Err(e) => {
                                warn!(
                                    client_id = %client_id,
                                    error = %e,
                                    "Invalid request"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        debug!(client_id = %client_id, error = %e, "Read error");
                        break;
                    }
                }
            }
        });

        // Writer task: deliver responses and filtered events
        let mut event_rx = self.event_tx.subscribe();
        let clients_writer = self.clients.clone();
        let message_tx_writer = self.message_tx.clone();

        tokio::spawn(async move {
            let mut writer = write_half;

            loop {
                tokio::select! {
                    biased;

                    // Reader finished: peer closed or read error
                    _ = &mut reader_task => {
                        break;
                    }

                    response = response_rx.recv() => {
                        let Some(response) = response else { break };
                        let mut msg = response;
                        msg.push('\n');
                        if let Err(e) = writer.write_all(msg.as_bytes()).await {
                            debug!(client_id = %client_id, error = %e, "Write error");
                            break;
                        }
                    }

                    event = event_rx.recv() => {
                        match event {
                            Ok(event) => {
                                let (subscribed, device) = {
                                    let clients = clients_writer.read().await;
                                    match clients.get(&client_id) {
                                        Some(handle) => (handle.subscribed, handle.device.clone()),
                                        None => (false, None),
                                    }
                                };

                                if wants_event(subscribed, device.as_ref(), &event) {
                                    if let Ok(json) = serde_json::to_string(&event) {
                                        let mut msg = json;
                                        msg.push('\n');
                                        if let Err(e) = writer.write_all(msg.as_bytes()).await {
                                            debug!(client_id = %client_id, error = %e, "Event write error");
                                            break;
                                        }
                                    }
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                // The client resynchronizes from its next fetch
                                warn!(client_id = %client_id, skipped, "Event stream lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                break;
                            }
                        }
                    }
                }
            }

            // Remove client and report the device binding it held
            let removed = {
                let mut clients = clients_writer.write().await;
                clients.remove(&client_id)
            };
            let device = removed.and_then(|handle| handle.device);

            let _ = message_tx_writer.send(ServerMessage::ClientDisconnected { client_id, device });

            reader_task.abort();
        });
    }

    /// Bind a connection to the device it locks for. Future time-over events
    /// for that device are delivered on this connection, and its disconnect
    /// is reported with the binding attached.
    pub async fn bind_device(&self, client_id: &ClientId, device_id: &DeviceId) {
        let mut clients = self.clients.write().await;
        if let Some(handle) = clients.get_mut(client_id) {
            handle.device = Some(device_id.clone());
        }
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Broadcast an event; each connection filters by subscription and binding
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Get connected client count
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
