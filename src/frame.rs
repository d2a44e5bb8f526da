// https://github.com/memcached/memcached/wiki/BinaryProtocolRevamped

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use thiserror::Error as ThisError;

/// Every frame starts with a fixed size header.
pub const HEADER_LEN: usize = 24;

pub const MAX_KEY_LEN: usize = u16::MAX as usize;
pub const MAX_EXTRAS_LEN: usize = u8::MAX as usize;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("protocol error; invalid magic byte {0:#04x}")]
    InvalidMagic(u8),
    #[error("protocol error; unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("protocol error; body length {body} is smaller than key length {key} plus extras length {extras}")]
    BodyLengthUnderflow { body: u32, key: u16, extras: u8 },
    #[error("protocol error; key length {0} exceeds 65535")]
    KeyTooLong(usize),
    #[error("protocol error; extras length {0} exceeds 255")]
    ExtrasTooLong(usize),
    #[error("protocol error; body length {0} does not fit in 32 bits")]
    BodyTooLong(usize),
}

/// Request vs response discriminant, carried on the wire as the magic byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Request,
    Response,
}

impl TryFrom<u8> for Kind {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x80 => Ok(Self::Request),
            0x81 => Ok(Self::Response),
            _ => Err(Error::InvalidMagic(byte)),
        }
    }
}

impl From<Kind> for u8 {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Request => 0x80,
            Kind::Response => 0x81,
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum_macros::EnumIter,
    strum_macros::EnumCount,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Opcode {
    Get,
    Set,
    Add,
    Replace,
    Delete,
    Increment,
    Decrement,
    GetQ,
    Noop,
    Version,
    GetK,
    GetKQ,
    Append,
    Prepend,
    SetQ,
    AddQ,
    ReplaceQ,
    DeleteQ,
    IncrementQ,
    DecrementQ,
    AppendQ,
    PrependQ,
}

/// Groups opcodes by the fields that are meaningful for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    /// GET, GETK and DELETE: key only.
    GetLike,
    /// SET, ADD and REPLACE: flags and expiration extras, key and value.
    SetLike,
    /// INCREMENT and DECREMENT: amount, initial value and expiration extras, key.
    CounterLike,
    /// APPEND and PREPEND: key and value.
    AppendLike,
    Version,
    Noop,
}

impl Family {
    /// Whether requests of this family are addressed by key and must carry one.
    pub fn requires_key(self) -> bool {
        !matches!(self, Family::Version | Family::Noop)
    }
}

impl Opcode {
    pub fn family(self) -> Family {
        match self {
            Opcode::Get
            | Opcode::GetQ
            | Opcode::GetK
            | Opcode::GetKQ
            | Opcode::Delete
            | Opcode::DeleteQ => Family::GetLike,
            Opcode::Set
            | Opcode::SetQ
            | Opcode::Add
            | Opcode::AddQ
            | Opcode::Replace
            | Opcode::ReplaceQ => Family::SetLike,
            Opcode::Increment | Opcode::IncrementQ | Opcode::Decrement | Opcode::DecrementQ => {
                Family::CounterLike
            }
            Opcode::Append | Opcode::AppendQ | Opcode::Prepend | Opcode::PrependQ => {
                Family::AppendLike
            }
            Opcode::Version => Family::Version,
            Opcode::Noop => Family::Noop,
        }
    }

    /// Quiet variants suppress the reply on success (or on a miss, for the GET variants).
    pub fn is_quiet(self) -> bool {
        matches!(
            self,
            Opcode::GetQ
                | Opcode::GetKQ
                | Opcode::SetQ
                | Opcode::AddQ
                | Opcode::ReplaceQ
                | Opcode::DeleteQ
                | Opcode::IncrementQ
                | Opcode::DecrementQ
                | Opcode::AppendQ
                | Opcode::PrependQ
        )
    }

    /// Maps a quiet variant to the command it is based on. Loud opcodes map to themselves.
    pub fn to_loud(self) -> Opcode {
        match self {
            Opcode::GetQ => Opcode::Get,
            Opcode::GetKQ => Opcode::GetK,
            Opcode::SetQ => Opcode::Set,
            Opcode::AddQ => Opcode::Add,
            Opcode::ReplaceQ => Opcode::Replace,
            Opcode::DeleteQ => Opcode::Delete,
            Opcode::IncrementQ => Opcode::Increment,
            Opcode::DecrementQ => Opcode::Decrement,
            Opcode::AppendQ => Opcode::Append,
            Opcode::PrependQ => Opcode::Prepend,
            other => other,
        }
    }

    /// The response status a quiet variant swallows. `None` for loud opcodes.
    pub fn suppressed_status(self) -> Option<Status> {
        match self {
            Opcode::GetQ | Opcode::GetKQ => Some(Status::KeyNotFound),
            op if op.is_quiet() => Some(Status::NoError),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x00 => Ok(Self::Get),
            0x01 => Ok(Self::Set),
            0x02 => Ok(Self::Add),
            0x03 => Ok(Self::Replace),
            0x04 => Ok(Self::Delete),
            0x05 => Ok(Self::Increment),
            0x06 => Ok(Self::Decrement),
            0x09 => Ok(Self::GetQ),
            0x0a => Ok(Self::Noop),
            0x0b => Ok(Self::Version),
            0x0c => Ok(Self::GetK),
            0x0d => Ok(Self::GetKQ),
            0x0e => Ok(Self::Append),
            0x0f => Ok(Self::Prepend),
            0x11 => Ok(Self::SetQ),
            0x12 => Ok(Self::AddQ),
            0x13 => Ok(Self::ReplaceQ),
            0x14 => Ok(Self::DeleteQ),
            0x15 => Ok(Self::IncrementQ),
            0x16 => Ok(Self::DecrementQ),
            0x19 => Ok(Self::AppendQ),
            0x1a => Ok(Self::PrependQ),
            _ => Err(Error::UnknownOpcode(byte)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Get => 0x00,
            Opcode::Set => 0x01,
            Opcode::Add => 0x02,
            Opcode::Replace => 0x03,
            Opcode::Delete => 0x04,
            Opcode::Increment => 0x05,
            Opcode::Decrement => 0x06,
            Opcode::GetQ => 0x09,
            Opcode::Noop => 0x0a,
            Opcode::Version => 0x0b,
            Opcode::GetK => 0x0c,
            Opcode::GetKQ => 0x0d,
            Opcode::Append => 0x0e,
            Opcode::Prepend => 0x0f,
            Opcode::SetQ => 0x11,
            Opcode::AddQ => 0x12,
            Opcode::ReplaceQ => 0x13,
            Opcode::DeleteQ => 0x14,
            Opcode::IncrementQ => 0x15,
            Opcode::DecrementQ => 0x16,
            Opcode::AppendQ => 0x19,
            Opcode::PrependQ => 0x1a,
        }
    }
}

/// Response status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    NoError,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumericValue,
    UnknownCommand,
    OutOfMemory,
    InternalError,
    Busy,
    TempFailure,
}

impl Status {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::NoError),
            0x0001 => Some(Self::KeyNotFound),
            0x0002 => Some(Self::KeyExists),
            0x0003 => Some(Self::ValueTooLarge),
            0x0004 => Some(Self::InvalidArguments),
            0x0005 => Some(Self::ItemNotStored),
            0x0006 => Some(Self::NonNumericValue),
            0x0081 => Some(Self::UnknownCommand),
            0x0082 => Some(Self::OutOfMemory),
            0x0084 => Some(Self::InternalError),
            0x0085 => Some(Self::Busy),
            0x0086 => Some(Self::TempFailure),
            _ => None,
        }
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> Self {
        match status {
            Status::NoError => 0x0000,
            Status::KeyNotFound => 0x0001,
            Status::KeyExists => 0x0002,
            Status::ValueTooLarge => 0x0003,
            Status::InvalidArguments => 0x0004,
            Status::ItemNotStored => 0x0005,
            Status::NonNumericValue => 0x0006,
            Status::UnknownCommand => 0x0081,
            Status::OutOfMemory => 0x0082,
            Status::InternalError => 0x0084,
            Status::Busy => 0x0085,
            Status::TempFailure => 0x0086,
        }
    }
}

/// The raw fixed-size header, before the magic and opcode are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    pub status_or_vbucket: u16,
    pub body_length: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    /// Reads the header from the front of `src`. The length fields are checked for consistency,
    /// nothing else is interpreted.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        if src.remaining() < HEADER_LEN {
            return Err(Error::Incomplete);
        }

        let header = Header {
            magic: src.get_u8(),
            opcode: src.get_u8(),
            key_length: src.get_u16(),
            extras_length: src.get_u8(),
            data_type: src.get_u8(),
            status_or_vbucket: src.get_u16(),
            body_length: src.get_u32(),
            opaque: src.get_u32(),
            cas: src.get_u64(),
        };

        if header.value_length().is_none() {
            return Err(Error::BodyLengthUnderflow {
                body: header.body_length,
                key: header.key_length,
                extras: header.extras_length,
            });
        }

        Ok(header)
    }

    pub fn value_length(&self) -> Option<u32> {
        self.body_length
            .checked_sub(self.key_length as u32 + self.extras_length as u32)
    }
}

/// Flags and expiration carried by SET, ADD and REPLACE requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetExtras {
    pub flags: u32,
    pub expiration: u32,
}

impl SetExtras {
    pub const LEN: usize = 8;

    pub fn to_bytes(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u32(self.flags);
        buf.put_u32(self.expiration);
        buf.freeze()
    }
}

/// Amount, initial value and expiration carried by INCREMENT and DECREMENT requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterExtras {
    pub amount: u64,
    pub initial: u64,
    pub expiration: u32,
}

impl CounterExtras {
    pub const LEN: usize = 20;

    pub fn to_bytes(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u64(self.amount);
        buf.put_u64(self.initial);
        buf.put_u32(self.expiration);
        buf.freeze()
    }
}

/// One protocol message, request or response.
///
/// Whether the frame is quiet is not stored: it is derived from `opcode`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: Kind,
    pub opcode: Opcode,
    pub data_type: u8,
    /// Routing hint (vbucket id) on requests, status code on responses.
    pub status_or_vbucket: u16,
    pub opaque: u32,
    pub cas: u64,
    pub key: Bytes,
    pub extras: Bytes,
    pub value: Bytes,
}

impl Frame {
    pub fn request(opcode: Opcode, key: impl Into<Bytes>) -> Frame {
        Frame {
            kind: Kind::Request,
            opcode,
            data_type: 0,
            status_or_vbucket: 0,
            opaque: 0,
            cas: 0,
            key: key.into(),
            extras: Bytes::new(),
            value: Bytes::new(),
        }
    }

    /// A response header matching `request`: same opcode, opaque and data type.
    pub fn response_to(request: &Frame, status: Status) -> Frame {
        Frame {
            kind: Kind::Response,
            opcode: request.opcode,
            data_type: request.data_type,
            status_or_vbucket: status.into(),
            opaque: request.opaque,
            cas: 0,
            key: Bytes::new(),
            extras: Bytes::new(),
            value: Bytes::new(),
        }
    }

    pub fn get(key: impl Into<Bytes>) -> Frame {
        Frame::request(Opcode::Get, key)
    }

    pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>, extras: SetExtras) -> Frame {
        Frame::request(Opcode::Set, key)
            .with_extras(extras.to_bytes())
            .with_value(value)
    }

    pub fn with_extras(mut self, extras: impl Into<Bytes>) -> Frame {
        self.extras = extras.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Frame {
        self.value = value.into();
        self
    }

    pub fn with_opaque(mut self, opaque: u32) -> Frame {
        self.opaque = opaque;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Frame {
        self.cas = cas;
        self
    }

    pub fn is_quiet(&self) -> bool {
        self.opcode.is_quiet()
    }

    /// The decoded status of a response frame.
    pub fn status(&self) -> Option<Status> {
        match self.kind {
            Kind::Response => Status::from_u16(self.status_or_vbucket),
            Kind::Request => None,
        }
    }

    pub fn set_extras(&self) -> Option<SetExtras> {
        if self.opcode.family() != Family::SetLike || self.extras.len() != SetExtras::LEN {
            return None;
        }
        let mut extras = &self.extras[..];
        Some(SetExtras {
            flags: extras.get_u32(),
            expiration: extras.get_u32(),
        })
    }

    pub fn counter_extras(&self) -> Option<CounterExtras> {
        if self.opcode.family() != Family::CounterLike || self.extras.len() != CounterExtras::LEN
        {
            return None;
        }
        let mut extras = &self.extras[..];
        Some(CounterExtras {
            amount: extras.get_u64(),
            initial: extras.get_u64(),
            expiration: extras.get_u32(),
        })
    }

    /// Sum of the extras, key and value lengths, as declared in the header.
    pub fn body_len(&self) -> usize {
        self.extras.len() + self.key.len() + self.value.len()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    /// Checks the length invariants that make the frame representable on the wire.
    pub fn validate(&self) -> Result<(), Error> {
        if self.key.len() > MAX_KEY_LEN {
            return Err(Error::KeyTooLong(self.key.len()));
        }
        if self.extras.len() > MAX_EXTRAS_LEN {
            return Err(Error::ExtrasTooLong(self.extras.len()));
        }
        if u32::try_from(self.body_len()).is_err() {
            return Err(Error::BodyTooLong(self.body_len()));
        }
        Ok(())
    }

    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        let header = Header::parse(src)?;
        Self::parse_body(header, src)
    }

    /// Reads the sections following an already parsed `header`: extras, key and value, in that
    /// order.
    pub fn parse_body(header: Header, src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        if src.remaining() < header.body_length as usize {
            return Err(Error::Incomplete);
        }

        let value_length = header.value_length().ok_or(Error::BodyLengthUnderflow {
            body: header.body_length,
            key: header.key_length,
            extras: header.extras_length,
        })?;

        let extras = src.copy_to_bytes(header.extras_length as usize);
        let key = src.copy_to_bytes(header.key_length as usize);
        let value = src.copy_to_bytes(value_length as usize);

        Ok(Frame {
            kind: Kind::try_from(header.magic)?,
            opcode: Opcode::try_from(header.opcode)?,
            data_type: header.data_type,
            status_or_vbucket: header.status_or_vbucket,
            opaque: header.opaque,
            cas: header.cas,
            key,
            extras,
            value,
        })
    }

    /// Writes the header followed by extras, key and value.
    pub fn write_to(&self, dst: &mut BytesMut) -> Result<(), Error> {
        self.validate()?;

        dst.reserve(self.encoded_len());
        dst.put_u8(u8::from(self.kind));
        dst.put_u8(u8::from(self.opcode));
        dst.put_u16(self.key.len() as u16);
        dst.put_u8(self.extras.len() as u8);
        dst.put_u8(self.data_type);
        dst.put_u16(self.status_or_vbucket);
        dst.put_u32(self.body_len() as u32);
        dst.put_u32(self.opaque);
        dst.put_u64(self.cas);
        dst.put_slice(&self.extras);
        dst.put_slice(&self.key);
        dst.put_slice(&self.value);

        Ok(())
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut bytes)?;
        Ok(bytes.to_vec())
    }
}

// Values are left out on purpose, they can be arbitrarily large.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Kind::Request => "request",
            Kind::Response => "response",
        };
        write!(
            f,
            "{} {} key={} opaque={} value_len={}",
            kind,
            self.opcode.name(),
            String::from_utf8_lossy(&self.key),
            self.opaque,
            self.value.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn serialize_get_request() {
        let frame = Frame::get("foo");

        let bytes = frame.serialize().unwrap();

        assert_eq!(bytes.len(), 27);
        assert_eq!(&bytes[..8], &[0x80, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[8..12], &3u32.to_be_bytes());
        assert_eq!(&bytes[24..], b"foo");

        let mut cursor = Cursor::new(&bytes[..]);
        assert_eq!(Frame::parse(&mut cursor), Ok(frame));
        assert_eq!(cursor.position(), 27);
    }

    #[test]
    fn serialize_set_request() {
        let extras = SetExtras {
            flags: 0,
            expiration: 0,
        };
        let frame = Frame::set("foo", "bar", extras);

        let bytes = frame.serialize().unwrap();

        assert_eq!(bytes.len(), 38);
        assert_eq!(&bytes[8..12], &14u32.to_be_bytes());
        assert_eq!(bytes[4], 8);
        // Extras come first, then the key, then the value.
        assert_eq!(&bytes[24..32], &[0; 8]);
        assert_eq!(&bytes[32..35], b"foo");
        assert_eq!(&bytes[35..], b"bar");

        let mut cursor = Cursor::new(&bytes[..]);
        assert_eq!(Frame::parse(&mut cursor), Ok(frame));
    }

    #[test]
    fn parse_passes_through_opaque_fields() {
        let frame = Frame {
            kind: Kind::Response,
            opcode: Opcode::GetK,
            data_type: 0x7f,
            status_or_vbucket: 0x0001,
            opaque: 0xdead_beef,
            cas: u64::MAX,
            key: Bytes::from("k"),
            extras: Bytes::from_static(&[0, 0, 0, 1]),
            value: Bytes::from("v"),
        };

        let bytes = frame.serialize().unwrap();
        let mut cursor = Cursor::new(&bytes[..]);

        let parsed = Frame::parse(&mut cursor).unwrap();

        assert_eq!(parsed, frame);
        assert_eq!(parsed.status(), Some(Status::KeyNotFound));
    }

    #[test]
    fn parse_every_opcode() {
        for opcode in Opcode::iter() {
            let key = if opcode.family().requires_key() {
                Bytes::from("key")
            } else {
                Bytes::new()
            };
            let frame = Frame::request(opcode, key).with_opaque(7).with_cas(42);

            let bytes = frame.serialize().unwrap();
            let mut cursor = Cursor::new(&bytes[..]);

            assert_eq!(Frame::parse(&mut cursor), Ok(frame), "{:?}", opcode);
        }
    }

    #[test]
    fn parse_incomplete_header() {
        let data = [0x80u8; 10];
        let mut cursor = Cursor::new(&data[..]);

        assert_eq!(Frame::parse(&mut cursor), Err(Error::Incomplete));
    }

    #[test]
    fn parse_incomplete_body() {
        let bytes = Frame::get("foo").serialize().unwrap();
        let mut cursor = Cursor::new(&bytes[..26]);

        assert_eq!(Frame::parse(&mut cursor), Err(Error::Incomplete));
    }

    #[test]
    fn parse_body_length_underflow() {
        let mut bytes = Frame::get("foo").serialize().unwrap();
        // Declare a body of 2 bytes for a 3 byte key.
        bytes[8..12].copy_from_slice(&2u32.to_be_bytes());
        let mut cursor = Cursor::new(&bytes[..HEADER_LEN]);

        assert_eq!(
            Frame::parse(&mut cursor),
            Err(Error::BodyLengthUnderflow {
                body: 2,
                key: 3,
                extras: 0
            })
        );
    }

    #[test]
    fn parse_unknown_opcode() {
        let mut bytes = Frame::get("foo").serialize().unwrap();
        bytes[1] = 0x42;
        let mut cursor = Cursor::new(&bytes[..]);

        assert_eq!(Frame::parse(&mut cursor), Err(Error::UnknownOpcode(0x42)));
    }

    #[test]
    fn parse_invalid_magic() {
        let mut bytes = Frame::get("foo").serialize().unwrap();
        bytes[0] = 0x7f;
        let mut cursor = Cursor::new(&bytes[..]);

        assert_eq!(Frame::parse(&mut cursor), Err(Error::InvalidMagic(0x7f)));
    }

    #[test]
    fn quiet_is_derived_from_opcode() {
        let quiet: Vec<Opcode> = Opcode::iter().filter(|op| op.is_quiet()).collect();

        assert_eq!(quiet.len(), 10);
        for opcode in quiet {
            assert_ne!(opcode.to_loud(), opcode);
            assert!(!opcode.to_loud().is_quiet());
            assert_eq!(opcode.to_loud().family(), opcode.family());
        }

        assert!(Frame::request(Opcode::SetQ, "a").is_quiet());
        assert!(!Frame::request(Opcode::Set, "a").is_quiet());
        assert_eq!(Opcode::GetKQ.suppressed_status(), Some(Status::KeyNotFound));
        assert_eq!(Opcode::DeleteQ.suppressed_status(), Some(Status::NoError));
        assert_eq!(Opcode::Get.suppressed_status(), None);
    }

    #[test]
    fn typed_extras() {
        let set = Frame::set(
            "foo",
            "bar",
            SetExtras {
                flags: 0xcafe,
                expiration: 300,
            },
        );
        assert_eq!(
            set.set_extras(),
            Some(SetExtras {
                flags: 0xcafe,
                expiration: 300
            })
        );
        assert_eq!(set.counter_extras(), None);

        let counter = CounterExtras {
            amount: 5,
            initial: 10,
            expiration: 0,
        };
        let incr = Frame::request(Opcode::IncrementQ, "hits").with_extras(counter.to_bytes());
        assert_eq!(incr.counter_extras(), Some(counter));

        let truncated = Frame::request(Opcode::Increment, "hits").with_extras(vec![0u8; 8]);
        assert_eq!(truncated.counter_extras(), None);
    }

    #[test]
    fn validate_lengths() {
        let frame = Frame::get(vec![b'k'; MAX_KEY_LEN + 1]);
        assert_eq!(frame.serialize(), Err(Error::KeyTooLong(MAX_KEY_LEN + 1)));

        let frame = Frame::get("k").with_extras(vec![0u8; MAX_EXTRAS_LEN + 1]);
        assert_eq!(
            frame.serialize(),
            Err(Error::ExtrasTooLong(MAX_EXTRAS_LEN + 1))
        );

        let frame = Frame::get(vec![b'k'; MAX_KEY_LEN]).with_extras(vec![0u8; MAX_EXTRAS_LEN]);
        assert!(frame.validate().is_ok());
    }
}
