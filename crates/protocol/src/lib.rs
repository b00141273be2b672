//! # MeshTether Protocol Library
//!
//! Types shared between the MeshTether daemon, its control clients and the
//! tethering worker.
//!
//! ## Overview
//!
//! - **Service state**: the `Stopped -> Starting -> Running` lifecycle and its
//!   numeric codes
//! - **Client records**: tethered clients as reported by the worker
//! - **Error taxonomy**: worker failure codes and their classification
//! - **Broadcasts**: the state-change broadcast and its capability scope
//! - **Framing**: newline-delimited JSON used on every local socket
//!
//! ## Example Usage
//!
//! ```rust
//! use meshtether_protocol::{encode_line, ErrorKind, ServiceState, StateBroadcast};
//!
//! let line = encode_line(&StateBroadcast::new(ServiceState::Running)).unwrap();
//! assert!(line.ends_with('\n'));
//!
//! // Unknown worker codes are never dropped
//! assert_eq!(ErrorKind::from_code(99), ErrorKind::Other);
//! ```

pub mod client;
pub mod error;
pub mod framing;
pub mod messages;
pub mod state;

pub use client::ClientRecord;
pub use error::{ErrorKind, ProtocolError, Result, ERROR_OTHER, ERROR_ROOT, ERROR_SUPPLICANT};
pub use framing::{decode_line, encode_line};
pub use messages::{
    BroadcastKind, StateBroadcast, ACCESS_STATE_SCOPE, ACTION_CHANGED, ACTION_CHECK,
    ACTION_CLIENTS, ACTION_TOGGLE,
};
pub use state::ServiceState;
