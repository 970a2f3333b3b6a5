//! ZeroMQ ROUTER transport.
//!
//! zeromq-rs prepends the peer identity frame on receive and pops it on send,
//! which matches the [`FrameTransport`] contract directly.
//!
//! Sends are polled once and never awaited. As with a ROUTER at its
//! high-water mark, a message the peer cannot take immediately is reported
//! as failed and never retried, so it is delivered at most once.

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info, warn};
use zeromq::prelude::*;
use zeromq::{RouterSocket, ZmqMessage};

use super::{FrameTransport, Frames, TrySendError};
use crate::core::SchedulerError;

/// ROUTER socket bound to one endpoint.
pub struct ZmqTransport {
    socket: RouterSocket,
    endpoint: String,
}

impl ZmqTransport {
    /// Bind a ROUTER socket, e.g. on `tcp://0.0.0.0:5501`.
    ///
    /// # Errors
    ///
    /// `Transport` if the endpoint cannot be bound.
    pub async fn bind(endpoint: &str) -> Result<Self, SchedulerError> {
        let mut socket = RouterSocket::new();
        info!(endpoint = %endpoint, "binding ROUTER socket");
        let bound = socket
            .bind(endpoint)
            .await
            .map_err(|e| SchedulerError::Transport(format!("bind {endpoint}: {e}")))?;
        Ok(Self {
            socket,
            endpoint: bound.to_string(),
        })
    }

    /// Endpoint actually bound (resolves wildcard ports).
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FrameTransport for ZmqTransport {
    async fn recv(&mut self) -> Result<Frames, SchedulerError> {
        let msg = self
            .socket
            .recv()
            .await
            .map_err(|e| SchedulerError::Transport(e.to_string()))?;
        let frames: Frames = msg.iter().map(|f| f.to_vec()).collect();
        debug!(frames = frames.len(), "ROUTER recv");
        Ok(frames)
    }

    fn try_send(&mut self, frames: Frames) -> Result<(), TrySendError> {
        // zeromq-rs panics on a message that is only an identity.
        if frames.len() < 2 {
            return Err(TrySendError::Failed(SchedulerError::Transport(
                "message has no frames after the identity".into(),
            )));
        }
        let mut iter = frames.into_iter();
        let mut msg = ZmqMessage::from(iter.next().unwrap_or_default());
        for frame in iter {
            msg.push_back(frame.into());
        }
        match self.socket.send(msg).now_or_never() {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(TrySendError::Failed(SchedulerError::Transport(e.to_string()))),
            None => {
                warn!(endpoint = %self.endpoint, "peer not writable, reply not retried");
                Err(TrySendError::Failed(SchedulerError::Transport(
                    "peer not writable".into(),
                )))
            }
        }
    }
}
