//! IPC message types for CLI-daemon communication.
//!
//! This module defines the request and response types used for communication
//! between the CLI and the daemon over Unix Domain Sockets.

use meshtether_protocol::{ClientRecord, ServiceState, StateBroadcast};
use serde::{Deserialize, Serialize};

/// Requests that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the daemon is alive.
    Ping,
    /// Get the service state. Also re-broadcasts it to subscribers.
    Status,
    /// Start tethering.
    Start,
    /// Stop tethering.
    Stop,
    /// Start when stopped, stop otherwise.
    Toggle,
    /// List the clients of the current session.
    ListClients,
    /// Stream state broadcasts on this connection.
    Subscribe {
        /// Capability token for the state scope.
        token: String,
    },
    /// Stop tethering and exit the daemon.
    Shutdown,
}

/// Responses sent from the daemon to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current service state.
    State {
        state: ServiceState,
        /// Number of clients in the current session.
        clients: usize,
    },
    /// Clients of the current session.
    Clients { clients: Vec<ClientRecord> },
    /// The subscription was accepted; `StateChanged` lines follow.
    Subscribed,
    /// A state broadcast, on subscribed connections.
    StateChanged(StateBroadcast),
    /// Acknowledgment that the daemon is exiting.
    ShuttingDown,
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_unit_requests_serialize_as_strings() {
        for (request, expected) in [
            (IpcRequest::Ping, r#""Ping""#),
            (IpcRequest::Toggle, r#""Toggle""#),
            (IpcRequest::ListClients, r#""ListClients""#),
        ] {
            let json = serde_json::to_string(&request).unwrap();
            assert_eq!(json, expected);
            let deserialized: IpcRequest = serde_json::from_str(&json).unwrap();
            assert_eq!(deserialized, request);
        }
    }

    #[test]
    fn test_subscribe_request_carries_token() {
        let json = r#"{"Subscribe":{"token":"secret"}}"#;
        let request: IpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            IpcRequest::Subscribe {
                token: "secret".to_string()
            }
        );
    }

    #[test]
    fn test_state_response_format() {
        let response = IpcResponse::State {
            state: ServiceState::Running,
            clients: 2,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"State":{"state":"running","clients":2}}"#);
    }

    #[test]
    fn test_state_changed_response_format() {
        let response = IpcResponse::StateChanged(StateBroadcast::new(ServiceState::Stopped));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.starts_with(r#"{"StateChanged":{"state":"stopped""#));

        let deserialized: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }

    #[test]
    fn test_clients_response_roundtrip() {
        let record = ClientRecord::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)))
            .with_hostname("tablet");
        let response = IpcResponse::Clients {
            clients: vec![record],
        };
        let json = serde_json::to_string(&response).unwrap();
        let deserialized: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, response);
    }
}
