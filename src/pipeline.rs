//! Per-connection request sequencing.
//!
//! Requests are dispatched to a [`ConnectionPool`] in the order they were decoded. The pool may
//! complete them in any order; responses are buffered in their slot and only released to the
//! client once every earlier slot has been released too.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::codec::Encoder;
use tracing::{debug, error, trace};

use crate::codec::FrameCodec;
use crate::frame::{Frame, Kind, Opcode, Status};
use crate::stats::ProxyStats;

/// Position of a request in the connection's sequence. Ids are handed out in submission order.
pub type SlotId = u64;

const PENDING: u8 = 0;
const DONE: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    #[error("protocol error; {0:?} request without a key")]
    EmptyKey(Opcode),
    #[error("protocol error; unexpected {0:?} response frame from client")]
    UnexpectedResponse(Opcode),
    #[error("connection is closing")]
    Closed,
}

impl Error {
    /// Request level errors only fail the offending request, the connection keeps going.
    pub fn is_request_level(&self) -> bool {
        matches!(self, Error::EmptyKey(_))
    }
}

/// Backend side of the proxy, shared by every connection.
pub trait ConnectionPool: Send + Sync {
    /// Dispatches `request`. `completion` may be resolved before this returns or at any later
    /// point. Returns a handle when the request is still in flight.
    fn make_request(
        &self,
        key: Bytes,
        request: Frame,
        completion: Completion,
    ) -> Option<Box<dyn PoolRequest>>;
}

/// An in-flight backend request.
pub trait PoolRequest: Send {
    /// Tells the pool the response is no longer wanted.
    fn cancel(&mut self);
}

pub trait DrainDecision: Send + Sync {
    /// Polled each time the pipeline runs out of outstanding requests.
    fn drain_close(&self) -> bool;
}

/// Outbound side of the client connection.
pub trait Transport {
    fn write(&mut self, data: Bytes);

    /// Close the connection once everything written so far has been flushed.
    fn close(&mut self);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Response(Frame),
    Failed(String),
}

/// A resolved completion, to be fed back into [`Pipeline::complete`].
#[derive(Debug)]
pub struct Completed {
    pub slot: SlotId,
    pub reply: Reply,
}

/// Completion callback handed to the pool along with each request.
///
/// Resolving it queues a [`Completed`] event for the owning connection. Once the slot has been
/// cancelled it resolves to nothing. Dropping it unresolved fails the request.
#[derive(Debug)]
pub struct Completion {
    slot: SlotId,
    state: Arc<AtomicU8>,
    tx: UnboundedSender<Completed>,
}

impl Completion {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    pub fn respond(mut self, response: Frame) {
        self.resolve(Reply::Response(response));
    }

    pub fn fail(mut self, reason: impl Into<String>) {
        self.resolve(Reply::Failed(reason.into()));
    }

    fn resolve(&mut self, reply: Reply) {
        if self
            .state
            .compare_exchange(PENDING, DONE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // The receiver is gone once the connection is torn down.
        let _ = self.tx.send(Completed {
            slot: self.slot,
            reply,
        });
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.resolve(Reply::Failed("request dropped by pool".to_string()));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Active,
    Draining,
    Closed,
}

#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Consult the drain decision when the pipeline empties.
    pub drain_close_enabled: bool,
    /// Abort the connection on request level errors instead of answering them.
    pub close_on_request_error: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            drain_close_enabled: true,
            close_on_request_error: false,
        }
    }
}

enum Outcome {
    Waiting,
    Ready(Frame),
    Suppressed,
}

struct PendingRequest {
    opcode: Opcode,
    opaque: u32,
    data_type: u8,
    handle: Option<Box<dyn PoolRequest>>,
    outcome: Outcome,
    state: Arc<AtomicU8>,
}

impl PendingRequest {
    fn new(request: &Frame) -> PendingRequest {
        PendingRequest {
            opcode: request.opcode,
            opaque: request.opaque,
            data_type: request.data_type,
            handle: None,
            outcome: Outcome::Waiting,
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    fn error_response(&self, status: Status, message: &'static str) -> Frame {
        let mut response = Frame::request(self.opcode, Bytes::new())
            .with_opaque(self.opaque)
            .with_value(message);
        response.kind = Kind::Response;
        response.data_type = self.data_type;
        response.status_or_vbucket = status.into();
        response
    }

    fn is_suppressed(&self, response: &Frame) -> bool {
        matches!(
            (self.opcode.suppressed_status(), response.status()),
            (Some(suppressed), Some(status)) if suppressed == status
        )
    }
}

pub type Completions = UnboundedReceiver<Completed>;

/// Reorder buffer for one client connection.
pub struct Pipeline {
    queue: VecDeque<PendingRequest>,
    // Id of the slot at the front of the queue. Queued ids are contiguous.
    head: SlotId,
    state: State,
    pool: Arc<dyn ConnectionPool>,
    drain: Arc<dyn DrainDecision>,
    stats: Arc<ProxyStats>,
    codec: FrameCodec,
    options: Options,
    tx: UnboundedSender<Completed>,
}

impl Pipeline {
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        drain: Arc<dyn DrainDecision>,
        stats: Arc<ProxyStats>,
        options: Options,
    ) -> (Pipeline, Completions) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = Pipeline {
            queue: VecDeque::new(),
            head: 0,
            state: State::Idle,
            pool,
            drain,
            codec: FrameCodec::new().with_stats(stats.clone()),
            stats,
            options,
            tx,
        };
        (pipeline, rx)
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Number of requests not yet released to the client.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn submit<T: Transport>(&mut self, request: Frame, transport: &mut T) -> Result<(), Error> {
        match self.state {
            State::Draining | State::Closed => return Err(Error::Closed),
            State::Idle => self.state = State::Active,
            State::Active => {}
        }

        if request.kind != Kind::Request {
            return Err(Error::UnexpectedResponse(request.opcode));
        }

        ProxyStats::inc(&self.stats.downstream_rq_total);

        if request.opcode.family().requires_key() && request.key.is_empty() {
            ProxyStats::inc(&self.stats.downstream_rq_rejected);
            if self.options.close_on_request_error {
                return Err(Error::EmptyKey(request.opcode));
            }

            let mut slot = PendingRequest::new(&request);
            slot.state.store(DONE, Ordering::Release);
            slot.outcome = Outcome::Ready(slot.error_response(Status::InvalidArguments, "key required"));
            self.push(slot);
            self.flush(transport);

            return Err(Error::EmptyKey(request.opcode));
        }

        let slot = PendingRequest::new(&request);
        let state = slot.state.clone();
        let id = self.push(slot);

        let completion = Completion {
            slot: id,
            state: state.clone(),
            tx: self.tx.clone(),
        };

        trace!(slot = id, "dispatching {}", request);
        let handle = self
            .pool
            .make_request(request.key.clone(), request, completion);

        // A pool that completed synchronously has nothing left to cancel.
        if state.load(Ordering::Acquire) == PENDING {
            if let Some(slot) = self.slot_mut(id) {
                slot.handle = handle;
            }
        }

        Ok(())
    }

    /// Attaches a reply to its slot and releases every response that is now in order.
    pub fn complete<T: Transport>(&mut self, completed: Completed, transport: &mut T) {
        if self.state == State::Closed {
            trace!(slot = completed.slot, "ignoring completion on closed pipeline");
            return;
        }

        let stats = self.stats.clone();
        let Some(slot) = self.slot_mut(completed.slot) else {
            trace!(slot = completed.slot, "ignoring completion for released slot");
            return;
        };

        if !matches!(slot.outcome, Outcome::Waiting) {
            return;
        }
        slot.handle = None;

        slot.outcome = match completed.reply {
            Reply::Response(response) if slot.is_suppressed(&response) => Outcome::Suppressed,
            Reply::Response(response) => Outcome::Ready(response),
            Reply::Failed(reason) => {
                debug!(slot = completed.slot, "backend failure: {}", reason);
                ProxyStats::inc(&stats.downstream_rq_backend_failure);
                Outcome::Ready(slot.error_response(Status::InternalError, "backend failure"))
            }
        };

        self.flush(transport);
    }

    /// Closes an idle pipeline if the drain decision asks for it. Returns whether it did.
    pub fn drain_if_idle<T: Transport>(&mut self, transport: &mut T) -> bool {
        if !self.queue.is_empty() || matches!(self.state, State::Draining | State::Closed) {
            return false;
        }
        self.maybe_drain_close(transport)
    }

    /// Cancels every outstanding request. No responses are written afterwards.
    pub fn on_disconnect(&mut self) {
        let outstanding = self.queue.len();

        for mut slot in self.queue.drain(..) {
            let _ = slot.state.compare_exchange(
                PENDING,
                CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            if let Some(mut handle) = slot.handle.take() {
                handle.cancel();
                ProxyStats::inc(&self.stats.downstream_rq_cancelled);
            }
            ProxyStats::dec(&self.stats.downstream_rq_active);
        }

        self.head += outstanding as SlotId;
        self.state = State::Closed;

        if outstanding > 0 {
            debug!(outstanding, "cancelled outstanding requests");
        }
    }

    fn push(&mut self, slot: PendingRequest) -> SlotId {
        let id = self.head + self.queue.len() as SlotId;
        self.queue.push_back(slot);
        ProxyStats::inc(&self.stats.downstream_rq_active);
        id
    }

    fn slot_mut(&mut self, id: SlotId) -> Option<&mut PendingRequest> {
        let index = id.checked_sub(self.head)?;
        self.queue.get_mut(usize::try_from(index).ok()?)
    }

    fn flush<T: Transport>(&mut self, transport: &mut T) {
        let mut buf = BytesMut::new();
        let mut released = 0;

        while matches!(
            self.queue.front(),
            Some(slot) if !matches!(slot.outcome, Outcome::Waiting)
        ) {
            let Some(slot) = self.queue.pop_front() else {
                break;
            };
            self.head += 1;
            released += 1;
            ProxyStats::dec(&self.stats.downstream_rq_active);

            let Outcome::Ready(response) = &slot.outcome else {
                continue;
            };
            if let Err(e) = self.codec.encode(response, &mut buf) {
                error!("failed to encode response: {}", e);
                let fallback = slot.error_response(Status::InternalError, "invalid response");
                if let Err(e) = self.codec.encode(&fallback, &mut buf) {
                    error!("failed to encode fallback response: {}", e);
                }
            }
        }

        if !buf.is_empty() {
            trace!(released, bytes = buf.len(), "flushing responses");
            transport.write(buf.freeze());
        }

        if released > 0 && self.queue.is_empty() {
            self.maybe_drain_close(transport);
        }
    }

    fn maybe_drain_close<T: Transport>(&mut self, transport: &mut T) -> bool {
        if !self.options.drain_close_enabled || !self.drain.drain_close() {
            return false;
        }

        debug!("drain closing connection");
        ProxyStats::inc(&self.stats.downstream_cx_drain_close);
        self.state = State::Draining;
        transport.close();
        true
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.state != State::Closed {
            self.on_disconnect();
        }
    }
}
