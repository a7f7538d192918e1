//! IPC client implementation

use playclock_api::{Command, Device, Event, Request, Response, ResponsePayload, ResponseResult, Session};
use playclock_util::DeviceId;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// IPC Client for connecting to playclockd
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    /// Connect to playclockd
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    /// Send a command and wait for response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        // Read response
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        let response: Response = serde_json::from_str(line.trim())?;
        if response.request_id != request_id {
            return Err(IpcError::InvalidMessage(format!(
                "response for request {} while waiting for {}",
                response.request_id, request_id
            )));
        }

        Ok(response)
    }

    /// Subscribe to events and consume this client to return an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        let response = self.send(Command::SubscribeEvents).await?;

        match response.result {
            ResponseResult::Ok(_) => {}
            ResponseResult::Err(e) => {
                return Err(IpcError::ServerError(e.message));
            }
        }

        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
        })
    }

    /// Register this connection as the lock client for a device.
    ///
    /// Consumes the client: after registration the connection carries only
    /// the device's events (its time-over in particular). The returned
    /// snapshot lets a reconnecting terminal converge immediately, covering
    /// any time-over it missed while disconnected.
    pub async fn register(
        mut self,
        device_id: DeviceId,
    ) -> IpcResult<(Device, Option<Session>, EventStream)> {
        let response = self.send(Command::RegisterDevice { device_id }).await?;

        match response.result {
            ResponseResult::Ok(ResponsePayload::Registered { device, session }) => Ok((
                device,
                session,
                EventStream {
                    reader: self.reader,
                    _writer: self.writer,
                },
            )),
            ResponseResult::Ok(other) => Err(IpcError::InvalidMessage(format!(
                "unexpected register payload: {other:?}"
            ))),
            ResponseResult::Err(e) => Err(IpcError::ServerError(e.message)),
        }
    }
}

/// Stream of events from playclockd
pub struct EventStream {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    /// Kept open: the server reads EOF on this connection as a disconnect
    _writer: tokio::net::unix::OwnedWriteHalf,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        let event: Event = serde_json::from_str(line.trim())?;
        Ok(event)
    }
}
