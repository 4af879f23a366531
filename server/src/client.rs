//! The client side of a bridge: a framed duplex connection to a browser or CLI.

use async_trait::async_trait;

use crate::error::ClientError;

/// One frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A JSON control envelope (see [`crate::bridge::frame`]).
    Text(String),
    /// Raw bytes destined for the shell's stdin.
    Binary(Vec<u8>),
}

/// A message-oriented duplex connection.
///
/// Methods take `&self` so the reader, the flusher and the closer can share
/// one connection; implementations serialise access internally.
#[async_trait]
pub trait ClientConnection: Send + Sync + 'static {
    /// Read the next frame. `Ok(None)` means the peer closed cleanly.
    ///
    /// Must be cancel-safe: the bridge drops pending reads on shutdown.
    async fn read_frame(&self) -> Result<Option<Inbound>, ClientError>;

    /// Send one binary frame of shell output.
    async fn write_frame(&self, data: Vec<u8>) -> Result<(), ClientError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), ClientError>;
}
