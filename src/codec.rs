use bytes::{Buf, BytesMut};
use std::convert::TryInto;
use std::io::{self, Cursor};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::frame::{self, Family, Frame, Header, Kind};
use crate::stats::ProxyStats;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] frame::Error),
    #[error("frame size {size} exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Binary protocol codec. Decoding never consumes a partial frame: bytes stay in the buffer until
/// the whole frame has arrived.
pub struct FrameCodec {
    max_frame_size: usize,
    stats: Option<Arc<ProxyStats>>,
}

impl FrameCodec {
    pub fn new() -> FrameCodec {
        FrameCodec {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            stats: None,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> FrameCodec {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_stats(mut self, stats: Arc<ProxyStats>) -> FrameCodec {
        self.stats = Some(stats);
        self
    }

    /// Decodes every complete frame at the front of `src` into `frames`. On error, the frames
    /// decoded before the bad one are still pushed.
    pub fn decode_all(&mut self, src: &mut BytesMut, frames: &mut Vec<Frame>) -> Result<(), Error> {
        while let Some(frame) = self.decode(src)? {
            frames.push(frame);
        }
        Ok(())
    }

    fn try_decode(&self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        let mut cursor = Cursor::new(&src[..]);

        let header = match Header::parse(&mut cursor) {
            Ok(header) => header,
            Err(frame::Error::Incomplete) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let size = frame::HEADER_LEN + header.body_length as usize;
        if size > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }

        let frame = match Frame::parse_body(header, &mut cursor) {
            Ok(frame) => frame,
            // Not enough data to parse a frame. The header stays in the buffer too.
            Err(frame::Error::Incomplete) => {
                src.reserve(size - src.len());
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let position: usize = cursor
            .position()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "cursor position overflow"))?;

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(frame))
    }
}

fn trace_decoded(frame: &Frame) {
    match frame.opcode.family() {
        Family::SetLike => match frame.set_extras() {
            Some(extras) => trace!(
                flags = extras.flags,
                expiration = extras.expiration,
                "decoded {}",
                frame
            ),
            None => trace!("decoded {}", frame),
        },
        Family::CounterLike => match frame.counter_extras() {
            Some(extras) => trace!(
                amount = extras.amount,
                initial = extras.initial,
                expiration = extras.expiration,
                "decoded {}",
                frame
            ),
            None => trace!("decoded {}", frame),
        },
        _ => trace!("decoded {}", frame),
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.try_decode(src) {
            Ok(Some(frame)) => {
                trace_decoded(&frame);
                if let (Some(stats), Kind::Request) = (&self.stats, frame.kind) {
                    stats.inc_op(frame.opcode);
                }
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                if let Some(stats) = &self.stats {
                    ProxyStats::inc(&stats.decode_error);
                }
                Err(err)
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&Frame>>::encode(self, &frame, dst)
    }
}

impl<'a> Encoder<&'a Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: &'a Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.write_to(dst).map_err(|err| {
            if let Some(stats) = &self.stats {
                ProxyStats::inc(&stats.encode_error);
            }
            Error::from(err)
        })
    }
}
