//! Request dispatch pipeline.
//!
//! One task owns the transport and multiplexes queued replies, inbound
//! requests and shutdown with `tokio::select!`. Replies are produced by
//! per-request tasks and reach the loop through a bounded queue.
//!
//! The loop never waits on a send. A reply the transport cannot take right
//! now is parked in a per-peer outbox queue and retried on later
//! iterations, so one stalled peer delays only its own replies. A periodic
//! poll tick keeps the loop retrying and re-checking its exit conditions
//! without inbound traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::core::{ExecutionEngine, SchedulerError};
use crate::infra::{FrameTransport, Frames, TrySendError};
use crate::runtime::api::{reply_type, ErrorReply, ERROR_REPLY_TYPE};
use crate::runtime::frames::{compose, parse_request, Envelope, Inbound};
use crate::runtime::registry::{HandlerRegistry, Resolved};

/// Counters reported when [`RequestPipeline::serve`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Requests that parsed and got a responder.
    pub accepted: u64,
    /// Messages dropped at the framing layer.
    pub malformed: u64,
    /// Replies handed to the transport.
    pub replies_sent: u64,
    /// Replies the transport rejected, or that expired while parked.
    pub send_failures: u64,
    /// Receive errors other than closure.
    pub transport_errors: u64,
}

/// Delivers exactly one reply for one request.
///
/// Consumed by [`reply`](Self::reply). Dropping it unreplied (for example
/// when a handler panics) queues a `task_abandoned` error instead.
pub struct Responder {
    route: Vec<Vec<u8>>,
    seq: u64,
    request_type: String,
    tx: Option<mpsc::Sender<Frames>>,
    _in_flight: InFlight,
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Responder {
    fn new(inbound: &Inbound, tx: mpsc::Sender<Frames>, in_flight: &Arc<AtomicUsize>) -> Self {
        Self {
            route: inbound.reply_route(),
            seq: inbound.envelope.seq,
            request_type: inbound.envelope.request_type.clone(),
            tx: Some(tx),
            _in_flight: InFlight::enter(in_flight),
        }
    }

    /// Sequence number the reply will carry.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Queue the reply for `result`.
    pub async fn reply(mut self, result: Result<Value, SchedulerError>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let frames = self.frames(result);
        if tx.send(frames).await.is_err() {
            warn!(seq = self.seq, "reply queue closed, reply lost");
        }
    }

    fn frames(&self, result: Result<Value, SchedulerError>) -> Frames {
        let (reply_type, body) = match result {
            Ok(body) => (reply_type(&self.request_type), body),
            Err(err) => {
                debug!(seq = self.seq, code = err.code(), error = %err, "error reply");
                let body = serde_json::to_value(ErrorReply::from(&err)).unwrap_or(Value::Null);
                (ERROR_REPLY_TYPE.to_string(), body)
            }
        };
        compose(self.route.clone(), &Envelope::new(self.seq, reply_type), &body)
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            error!(seq = self.seq, request_type = %self.request_type, "responder dropped without reply");
            let frames = self.frames(Err(SchedulerError::TaskAbandoned));
            if tx.try_send(frames).is_err() {
                warn!(seq = self.seq, "could not queue abandoned reply");
            }
        }
    }
}

/// Signals a running pipeline to stop accepting requests.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Stop intake; in-flight requests still get their replies.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}

/// Terminates a transport and dispatches requests to registered handlers.
pub struct RequestPipeline {
    engine: ExecutionEngine,
    registry: Arc<HandlerRegistry>,
    config: PipelineConfig,
    shutdown: Arc<watch::Sender<bool>>,
    in_flight: Arc<AtomicUsize>,
}

impl RequestPipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(engine: ExecutionEngine, registry: HandlerRegistry, config: PipelineConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            engine,
            registry: Arc::new(registry),
            config,
            shutdown: Arc::new(shutdown),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle that stops this pipeline.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Requests accepted but not yet replied to.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Serve `transport` until shutdown (or transport closure) and drain.
    ///
    /// On stop, every live session begins closing, and the loop keeps
    /// delivering replies until in-flight requests finish and no reply is
    /// parked, or the drain timeout passes.
    pub async fn serve<T: FrameTransport>(&self, mut transport: T) -> PipelineStats {
        let (out_tx, mut out_rx) = mpsc::channel::<Frames>(self.config.send_queue_depth);
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut stats = PipelineStats::default();
        let mut outbox = Outbox::new(self.config.send_timeout(), self.config.send_queue_depth);
        let mut drain_deadline: Option<Instant> = None;
        if *shutdown_rx.borrow_and_update() {
            drain_deadline = Some(self.stop_intake());
        }
        info!(
            queue_depth = self.config.send_queue_depth,
            handlers = self.registry.len(),
            "request pipeline serving"
        );

        loop {
            outbox.retry(&mut transport, &mut stats);
            if let Some(deadline) = drain_deadline {
                if self.in_flight() == 0 && out_rx.is_empty() && outbox.is_empty() {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(
                        in_flight = self.in_flight(),
                        parked = outbox.len(),
                        "drain timeout, abandoning undelivered replies"
                    );
                    break;
                }
            }
            let accepting = drain_deadline.is_none();

            tokio::select! {
                biased;
                Some(frames) = out_rx.recv() => outbox.deliver(&mut transport, frames, &mut stats),
                received = transport.recv(), if accepting => match received {
                    Ok(frames) => self.accept(frames, &out_tx, &mut stats),
                    Err(SchedulerError::TransportClosed) => {
                        info!("transport closed");
                        drain_deadline = Some(self.stop_intake());
                    }
                    Err(e) => {
                        error!(error = %e, "receive failed");
                        stats.transport_errors += 1;
                    }
                },
                changed = shutdown_rx.changed(), if accepting => {
                    if changed.is_err() || *shutdown_rx.borrow_and_update() {
                        drain_deadline = Some(self.stop_intake());
                    }
                }
                () = tokio::time::sleep(self.config.poll_timeout()) => {}
            }
        }

        stats.send_failures += outbox.abandon();
        info!(
            accepted = stats.accepted,
            replies = stats.replies_sent,
            malformed = stats.malformed,
            send_failures = stats.send_failures,
            "request pipeline stopped"
        );
        stats
    }

    fn stop_intake(&self) -> Instant {
        let closing = self.engine.reset();
        info!(closing, in_flight = self.in_flight(), "pipeline stopped accepting requests");
        Instant::now() + self.config.drain_timeout()
    }

    fn accept(&self, frames: Frames, out_tx: &mpsc::Sender<Frames>, stats: &mut PipelineStats) {
        let inbound = match parse_request(frames) {
            Ok(inbound) => inbound,
            Err(e) => {
                error!(error = %e, "dropping malformed message");
                stats.malformed += 1;
                return;
            }
        };
        stats.accepted += 1;
        let responder = Responder::new(&inbound, out_tx.clone(), &self.in_flight);
        debug!(
            seq = inbound.envelope.seq,
            request_type = %inbound.envelope.request_type,
            "request accepted"
        );

        let Inbound { envelope, body, .. } = inbound;
        match self.registry.resolve(&self.engine, &envelope, body) {
            Ok(Resolved { handler, ctx, body }) => {
                tokio::spawn(async move {
                    let result = handler.handle(ctx, body).await;
                    responder.reply(result).await;
                });
            }
            Err(e) => {
                warn!(seq = responder.seq(), code = e.code(), "request rejected");
                tokio::spawn(responder.reply(Err(e)));
            }
        }
    }

}

/// Replies waiting for a peer that is not accepting writes, keyed by the
/// routing identity they are addressed to.
///
/// A peer with parked replies keeps its order: new replies queue behind the
/// parked ones instead of overtaking them.
struct Outbox {
    parked: HashMap<Vec<u8>, VecDeque<(Instant, Frames)>>,
    max_age: Duration,
    max_per_peer: usize,
}

impl Outbox {
    fn new(max_age: Duration, max_per_peer: usize) -> Self {
        Self {
            parked: HashMap::new(),
            max_age,
            max_per_peer: max_per_peer.max(1),
        }
    }

    fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    fn len(&self) -> usize {
        self.parked.values().map(VecDeque::len).sum()
    }

    fn deliver<T: FrameTransport>(&mut self, transport: &mut T, frames: Frames, stats: &mut PipelineStats) {
        let peer = frames.first().cloned().unwrap_or_default();
        if let Some(queue) = self.parked.get_mut(&peer) {
            queue.push_back((Instant::now(), frames));
            if queue.len() > self.max_per_peer {
                queue.pop_front();
                warn!(parked = queue.len(), "peer backlog full, oldest reply dropped");
                stats.send_failures += 1;
            }
            return;
        }
        match transport.try_send(frames) {
            Ok(()) => stats.replies_sent += 1,
            Err(TrySendError::WouldBlock(frames)) => {
                debug!("peer not writable, reply parked");
                self.parked
                    .entry(peer)
                    .or_default()
                    .push_back((Instant::now(), frames));
            }
            Err(TrySendError::Failed(e)) => {
                warn!(error = %e, "reply send failed");
                stats.send_failures += 1;
            }
        }
    }

    /// Flush what the transport takes now and expire what is too old.
    fn retry<T: FrameTransport>(&mut self, transport: &mut T, stats: &mut PipelineStats) {
        if self.parked.is_empty() {
            return;
        }
        let now = Instant::now();
        let max_age = self.max_age;
        self.parked.retain(|_, queue| {
            while let Some((parked_at, frames)) = queue.pop_front() {
                match transport.try_send(frames) {
                    Ok(()) => stats.replies_sent += 1,
                    Err(TrySendError::WouldBlock(frames)) => {
                        if now.duration_since(parked_at) >= max_age {
                            warn!(max_age = ?max_age, "parked reply expired");
                            stats.send_failures += 1;
                            continue;
                        }
                        queue.push_front((parked_at, frames));
                        break;
                    }
                    Err(TrySendError::Failed(e)) => {
                        warn!(error = %e, "parked reply send failed");
                        stats.send_failures += 1;
                    }
                }
            }
            !queue.is_empty()
        });
    }

    /// Drop everything still parked, returning how many replies were lost.
    fn abandon(&mut self) -> u64 {
        let lost = self.len() as u64;
        if lost > 0 {
            warn!(lost, "replies still parked at stop");
        }
        self.parked.clear();
        lost
    }
}
