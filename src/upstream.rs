//! Connection pool forwarding requests to upstream memcached servers.
//!
//! Keys are sharded over the configured servers with crc32. Every server gets one connection,
//! owned by a writer task, with a reader task matching replies to requests in FIFO order. Quiet
//! requests are forwarded as their loud variant so that every request gets exactly one reply; the
//! client's opcode and opaque are restored on the reply.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::codec::{self, FrameCodec};
use crate::frame::{Frame, Kind, Opcode};
use crate::pipeline::{Completion, ConnectionPool, PoolRequest};
use crate::Error;

struct Dispatch {
    request: Frame,
    completion: Completion,
    cancelled: Arc<AtomicBool>,
}

/// A request written upstream, waiting for its reply.
struct InFlight {
    sequence: u32,
    opcode: Opcode,
    opaque: u32,
    completion: Completion,
    cancelled: Arc<AtomicBool>,
}

struct Shard {
    addr: SocketAddr,
    tx: UnboundedSender<Dispatch>,
}

pub struct UpstreamPool {
    shards: Vec<Shard>,
}

impl UpstreamPool {
    /// Spawns one task per upstream server. Must be called from within a tokio runtime.
    pub fn new(addrs: &[SocketAddr], max_frame_size: usize) -> Result<UpstreamPool, Error> {
        if addrs.is_empty() {
            return Err("upstream pool needs at least one server".into());
        }

        let shards = addrs
            .iter()
            .map(|&addr| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_shard(addr, rx, max_frame_size));
                Shard { addr, tx }
            })
            .collect();

        Ok(UpstreamPool { shards })
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.shards.iter().map(|shard| shard.addr).collect()
    }

    fn shard(&self, key: &[u8]) -> &Shard {
        &self.shards[shard_index(key, self.shards.len())]
    }
}

/// Keyless requests always go to the first shard.
pub fn shard_index(key: &[u8], shards: usize) -> usize {
    if key.is_empty() || shards <= 1 {
        return 0;
    }
    crc32fast::hash(key) as usize % shards
}

impl ConnectionPool for UpstreamPool {
    fn make_request(
        &self,
        key: Bytes,
        request: Frame,
        completion: Completion,
    ) -> Option<Box<dyn PoolRequest>> {
        let shard = self.shard(&key);
        let cancelled = Arc::new(AtomicBool::new(false));

        let dispatch = Dispatch {
            request,
            completion,
            cancelled: cancelled.clone(),
        };
        // A stopped shard drops the dispatch, which fails the completion.
        if shard.tx.send(dispatch).is_err() {
            warn!(upstream = %shard.addr, "upstream shard is not running");
            return None;
        }

        Some(Box::new(UpstreamRequest { cancelled }))
    }
}

pub struct UpstreamRequest {
    cancelled: Arc<AtomicBool>,
}

impl PoolRequest for UpstreamRequest {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

struct UpstreamConnection {
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    in_flight: UnboundedSender<InFlight>,
    reader: JoinHandle<()>,
}

impl UpstreamConnection {
    async fn connect(addr: SocketAddr, max_frame_size: usize) -> io::Result<UpstreamConnection> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!(upstream = %addr, "connected to upstream");

        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(
            read_half,
            FrameCodec::new().with_max_frame_size(max_frame_size),
        );
        let writer = FramedWrite::new(write_half, FrameCodec::new());
        let (in_flight, in_flight_rx) = mpsc::unbounded_channel();

        Ok(UpstreamConnection {
            writer,
            in_flight,
            reader: tokio::spawn(read_replies(addr, reader, in_flight_rx)),
        })
    }

    fn is_closed(&self) -> bool {
        self.in_flight.is_closed()
    }

    async fn send(&mut self, dispatch: Dispatch, sequence: u32) -> Result<(), codec::Error> {
        let Dispatch {
            mut request,
            completion,
            cancelled,
        } = dispatch;

        let in_flight = InFlight {
            sequence,
            opcode: request.opcode,
            opaque: request.opaque,
            completion,
            cancelled,
        };
        request.opcode = request.opcode.to_loud();
        request.opaque = sequence;

        // Queued before writing so the reader knows about it when the reply comes in.
        if self.in_flight.send(in_flight).is_err() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "upstream reader stopped").into());
        }
        self.writer.send(request).await
    }
}

impl Drop for UpstreamConnection {
    fn drop(&mut self) {
        // Aborting the reader drops its in-flight requests, failing them.
        self.reader.abort();
    }
}

async fn run_shard(addr: SocketAddr, mut rx: UnboundedReceiver<Dispatch>, max_frame_size: usize) {
    let mut connection: Option<UpstreamConnection> = None;
    let mut sequence: u32 = 0;

    while let Some(dispatch) = rx.recv().await {
        if dispatch.cancelled.load(Ordering::Acquire) {
            trace!(
                upstream = %addr,
                slot = dispatch.completion.slot(),
                "skipping cancelled request"
            );
            continue;
        }

        if connection.as_ref().map_or(true, UpstreamConnection::is_closed) {
            connection = None;
            match UpstreamConnection::connect(addr, max_frame_size).await {
                Ok(conn) => connection = Some(conn),
                Err(e) => {
                    warn!(upstream = %addr, "failed to connect to upstream: {}", e);
                    dispatch.completion.fail(format!("upstream {} unavailable", addr));
                    continue;
                }
            }
        }

        let Some(conn) = connection.as_mut() else {
            continue;
        };

        sequence = sequence.wrapping_add(1);
        if let Err(e) = conn.send(dispatch, sequence).await {
            warn!(upstream = %addr, "failed to write to upstream: {}", e);
            connection = None;
        }
    }

    debug!(upstream = %addr, "upstream shard stopped");
}

async fn read_replies(
    addr: SocketAddr,
    mut reader: FramedRead<OwnedReadHalf, FrameCodec>,
    mut in_flight: UnboundedReceiver<InFlight>,
) {
    while let Some(reply) = reader.next().await {
        let mut reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(upstream = %addr, "failed to decode upstream reply: {}", e);
                return;
            }
        };

        let Ok(pending) = in_flight.try_recv() else {
            warn!(upstream = %addr, "unsolicited upstream reply: {}", reply);
            return;
        };

        if reply.kind != Kind::Response || reply.opaque != pending.sequence {
            warn!(
                upstream = %addr,
                expected = pending.sequence,
                "out of sequence upstream reply: {}", reply
            );
            return;
        }

        reply.opcode = pending.opcode;
        reply.opaque = pending.opaque;

        if pending.cancelled.load(Ordering::Acquire) {
            trace!(
                upstream = %addr,
                slot = pending.completion.slot(),
                "discarding reply for cancelled request"
            );
            continue;
        }
        pending.completion.respond(reply);
    }

    info!(upstream = %addr, "upstream closed the connection");
}
