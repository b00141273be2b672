//! IPC Client for communicating with the daemon via Unix Domain Sockets.
//!
//! The client connects to the daemon's Unix socket and sends commands,
//! receiving responses in a request-response pattern. A subscribed client
//! instead reads a stream of state broadcasts.

use std::io;
use std::path::Path;
use std::time::Duration;

use meshtether_protocol::{decode_line, encode_line, StateBroadcast};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::messages::{IpcRequest, IpcResponse};
use super::server::IpcError;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

fn timed_out(what: &str) -> IpcError {
    IpcError::Io(io::Error::new(io::ErrorKind::TimedOut, what.to_string()))
}

/// A client for communicating with the daemon via IPC.
pub struct IpcClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    timeout: Duration,
}

impl IpcClient {
    /// Connect to the daemon at the specified socket path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    /// This typically indicates that the daemon is not running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(
            stream,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        ))
    }

    /// Connect to the daemon with a custom timeout.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| timed_out("connection timed out"))??;
        Ok(Self::from_stream(stream, timeout))
    }

    fn from_stream(stream: UnixStream, timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
        }
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request to the daemon and wait for a response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent, the response cannot
    /// be read or parsed, or the operation times out.
    pub async fn send(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        tokio::time::timeout(self.timeout, self.send_internal(request))
            .await
            .map_err(|_| timed_out("operation timed out"))?
    }

    async fn send_internal(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        let line = encode_line(&request)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        self.recv().await?.ok_or_else(|| {
            IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed connection",
            ))
        })
    }

    /// Read the next response line without a timeout.
    ///
    /// Returns `None` when the daemon closed the connection.
    pub async fn recv(&mut self) -> Result<Option<IpcResponse>, IpcError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(decode_line(&line)?))
    }

    /// Send a ping request to check if the daemon is responsive.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        let response = self.send(IpcRequest::Ping).await?;
        Ok(matches!(response, IpcResponse::Pong))
    }

    /// Get the current service state.
    pub async fn status(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Status).await
    }

    /// Request the service to start.
    pub async fn start(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Start).await
    }

    /// Request the service to stop.
    pub async fn stop(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Stop).await
    }

    /// Toggle the service.
    pub async fn toggle(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Toggle).await
    }

    /// List the clients of the current session.
    pub async fn list_clients(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::ListClients).await
    }

    /// Ask the daemon to exit.
    pub async fn shutdown(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Shutdown).await
    }

    /// Subscribe to state broadcasts.
    ///
    /// Returns the daemon's answer; on `Subscribed`, use
    /// [`next_broadcast`](Self::next_broadcast) to read the stream.
    pub async fn subscribe(&mut self, token: &str) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Subscribe {
            token: token.to_string(),
        })
        .await
    }

    /// Wait for the next state broadcast on a subscribed connection.
    ///
    /// Returns `None` when the daemon closed the connection.
    pub async fn next_broadcast(&mut self) -> Result<Option<StateBroadcast>, IpcError> {
        loop {
            match self.recv().await? {
                Some(IpcResponse::StateChanged(broadcast)) => return Ok(Some(broadcast)),
                Some(other) => tracing::debug!("Ignoring non-broadcast response: {:?}", other),
                None => return Ok(None),
            }
        }
    }
}
