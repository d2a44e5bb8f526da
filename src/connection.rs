use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::codec::{self, FrameCodec};
use crate::frame::Frame;
use crate::pipeline::Transport;
use crate::stats::ProxyStats;

pub struct Connection {
    pub id: Uuid,
    pub client_address: SocketAddr,
    stream: TcpStream,
    // Data is read from the socket into the read buffer. When a frame is parsed, the corresponding
    // data is removed from the buffer.
    buffer: BytesMut,
    codec: FrameCodec,
    // A decode error found behind complete frames, returned by the next read.
    error: Option<codec::Error>,
    stats: Arc<ProxyStats>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        client_address: SocketAddr,
        codec: FrameCodec,
        stats: Arc<ProxyStats>,
    ) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            client_address,
            stream,
            // Allocate the buffer with 4kb of capacity.
            buffer: BytesMut::with_capacity(4096),
            codec,
            error: None,
            stats,
        }
    }

    /// Reads until at least one complete frame is buffered and returns every complete frame.
    /// Returns `None` when the client closed the connection cleanly.
    ///
    /// Frames preceding a malformed one are returned first, the error comes with the next call.
    pub async fn read_frames(&mut self) -> Result<Option<Vec<Frame>>, codec::Error> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }

        loop {
            let mut frames = Vec::new();
            match self.codec.decode_all(&mut self.buffer, &mut frames) {
                Ok(()) if frames.is_empty() => {}
                Ok(()) => return Ok(Some(frames)),
                Err(err) if frames.is_empty() => return Err(err),
                Err(err) => {
                    self.error = Some(err);
                    return Ok(Some(frames));
                }
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection closed in the middle of a frame",
                )
                .into());
            }
            ProxyStats::add(&self.stats.downstream_cx_rx_bytes_total, n as u64);
        }
    }

    /// Writes everything buffered in `outbound`. When a close was requested, shuts the socket
    /// down afterwards and returns `true`.
    pub async fn flush(&mut self, outbound: &mut Outbound) -> io::Result<bool> {
        if !outbound.buffer.is_empty() {
            self.stream.write_all(&outbound.buffer).await?;
            ProxyStats::add(
                &self.stats.downstream_cx_tx_bytes_total,
                outbound.buffer.len() as u64,
            );
            outbound.buffer.clear();
        }

        if outbound.close {
            self.stream.shutdown().await?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Responses waiting to be written to the client.
#[derive(Debug, Default)]
pub struct Outbound {
    buffer: BytesMut,
    close: bool,
}

impl Outbound {
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_closing(&self) -> bool {
        self.close
    }
}

impl Transport for Outbound {
    fn write(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    fn close(&mut self) {
        self.close = true;
    }
}
