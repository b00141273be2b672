//! Serves control requests against the running service.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{IpcRequest, IpcResponse};
use super::server::{IpcConnection, IpcError, IpcServer};
use crate::service::ServiceStateMachine;
use crate::status::StatusFanout;

/// Answers control requests.
pub struct ControlHandler {
    machine: Arc<ServiceStateMachine>,
    fanout: Arc<StatusFanout>,
    exit: CancellationToken,
}

impl ControlHandler {
    /// `exit` is cancelled when a client asks the daemon to shut down.
    pub fn new(
        machine: Arc<ServiceStateMachine>,
        fanout: Arc<StatusFanout>,
        exit: CancellationToken,
    ) -> Self {
        Self {
            machine,
            fanout,
            exit,
        }
    }

    fn state_response(&self) -> IpcResponse {
        IpcResponse::State {
            state: self.machine.state(),
            clients: self.machine.clients().len(),
        }
    }

    /// Handles a single request/response exchange.
    ///
    /// `Subscribe` is handled by [`serve_connection`], which turns the
    /// connection into a broadcast stream.
    pub fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::Status => {
                // A worker may have died without reporting it.
                self.machine.reconcile();
                let state = self.machine.state();
                self.fanout.broadcast(state);
                self.state_response()
            }
            IpcRequest::Start => {
                self.machine.request_start();
                self.state_response()
            }
            IpcRequest::Stop => {
                self.machine.request_stop();
                self.state_response()
            }
            IpcRequest::Toggle => {
                self.machine.toggle();
                self.state_response()
            }
            IpcRequest::ListClients => IpcResponse::Clients {
                clients: self.machine.clients(),
            },
            IpcRequest::Shutdown => {
                info!("Shutdown requested over control socket");
                self.exit.cancel();
                IpcResponse::ShuttingDown
            }
            IpcRequest::Subscribe { .. } => IpcResponse::Error {
                message: "subscribe must be the first request on a connection".to_string(),
            },
        }
    }
}

/// Serves one client connection until it disconnects.
pub async fn serve_connection(
    handler: Arc<ControlHandler>,
    mut conn: IpcConnection,
    cancel: CancellationToken,
) -> Result<(), IpcError> {
    let mut first = true;
    while let Some(request) = conn.read_request().await? {
        debug!(?request, "Control request");

        if let IpcRequest::Subscribe { token } = &request {
            if first {
                return stream_broadcasts(&handler, conn, token, cancel).await;
            }
        }
        first = false;

        let response = handler.handle(request);
        conn.send_response(&response).await?;
    }
    Ok(())
}

async fn stream_broadcasts(
    handler: &ControlHandler,
    mut conn: IpcConnection,
    token: &str,
    cancel: CancellationToken,
) -> Result<(), IpcError> {
    let mut rx = match handler.fanout.subscribe(token) {
        Ok(rx) => rx,
        Err(e) => {
            return conn
                .send_response(&IpcResponse::Error {
                    message: e.to_string(),
                })
                .await;
        }
    };
    conn.send_response(&IpcResponse::Subscribed).await?;
    debug!("Control client subscribed to state broadcasts");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            received = rx.recv() => match received {
                Ok(broadcast) => {
                    conn.send_response(&IpcResponse::StateChanged(broadcast)).await?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "State subscriber lagging, skipped broadcasts");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

/// Accepts control connections until `cancel` fires.
pub async fn run_control_server(
    server: IpcServer,
    handler: Arc<ControlHandler>,
    cancel: CancellationToken,
) {
    info!("Control socket listening at {:?}", server.path());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = server.accept() => match accepted {
                Ok(conn) => {
                    let handler = Arc::clone(&handler);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(handler, conn, cancel).await {
                            debug!("Control connection ended: {}", e);
                        }
                    });
                }
                Err(e) => warn!("Failed to accept control connection: {}", e),
            },
        }
    }

    debug!("Control server stopped");
}
