//! # parlor-shared
//!
//! Types shared between the Parlor server and its store: the JSON wire
//! protocol spoken over the WebSocket, participant identities, validated
//! channel names, and the protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ChannelNameError, ProtocolError};
pub use types::{ChannelName, ConnectionId, Identity};
