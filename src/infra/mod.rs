//! Infrastructure adapters for the request transport.

pub mod transport;

pub use transport::{
    memory_router, FrameTransport, Frames, MemoryConnector, MemoryPeer, MemoryRouter, TrySendError,
};
#[cfg(feature = "zmq-transport")]
pub use transport::ZmqTransport;
