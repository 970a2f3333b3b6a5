//! Multipart frame transports terminating the request pipeline.
//!
//! A transport behaves like a ZeroMQ ROUTER socket: every received message
//! starts with the sender's routing identity, and the first frame of every
//! sent message names the peer it is routed to (and is stripped before
//! delivery).

pub mod memory;
#[cfg(feature = "zmq-transport")]
pub mod zmq;

use async_trait::async_trait;

use crate::core::SchedulerError;

/// One multipart message.
pub type Frames = Vec<Vec<u8>>;

/// Why [`FrameTransport::try_send`] did not deliver a message.
#[derive(Debug)]
pub enum TrySendError {
    /// The peer cannot take the message right now. The frames are handed back
    /// so the caller can park them and retry.
    WouldBlock(Frames),
    /// Delivery failed and retrying will not help.
    Failed(SchedulerError),
}

/// ROUTER-style message transport.
///
/// Receiving may wait; sending never does. A reply for a peer that is not
/// writable comes back as [`TrySendError::WouldBlock`] instead of stalling
/// the caller.
#[async_trait]
pub trait FrameTransport: Send {
    /// Receive the next message, identity frames first.
    ///
    /// # Errors
    ///
    /// `TransportClosed` once no peer can send anymore; `Transport` for any
    /// other receive fault.
    async fn recv(&mut self) -> Result<Frames, SchedulerError>;

    /// Route `frames` to the peer named by the first frame, without waiting.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when the peer is not writable, `Failed` when the message
    /// cannot be delivered at all.
    fn try_send(&mut self, frames: Frames) -> Result<(), TrySendError>;
}

pub use memory::{memory_router, MemoryConnector, MemoryPeer, MemoryRouter};
#[cfg(feature = "zmq-transport")]
pub use self::zmq::ZmqTransport;
