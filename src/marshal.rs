//! Payload abstractions handed to the transport layer.
//!
//! A [`Marshaler`] is a serialized telemetry request that knows its size and can
//! write itself. A [`MessageWriter`] is the per-call view a sender consumes: it
//! binds a marshaler to the wire format chosen for the exporter.

use std::io::{self, Write};
use std::ops::Deref;

use bytes::Bytes;

/// Wire format of the request payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Protobuf binary encoding.
    #[default]
    Binary,
    /// Protobuf JSON mapping.
    Json,
}

impl PayloadFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Binary => "application/x-protobuf",
            Self::Json => "application/json",
        }
    }
}

pub trait Marshaler: Send + Sync {
    /// Exact length of the binary encoding.
    fn binary_serialized_size(&self) -> usize;

    fn write_binary_to(&self, out: &mut dyn Write) -> io::Result<()>;

    fn write_json_to(&self, _out: &mut dyn Write) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "payload does not support JSON encoding",
        ))
    }
}

impl<M: Marshaler + ?Sized> Marshaler for Box<M> {
    fn binary_serialized_size(&self) -> usize {
        (**self).binary_serialized_size()
    }

    fn write_binary_to(&self, out: &mut dyn Write) -> io::Result<()> {
        (**self).write_binary_to(out)
    }

    fn write_json_to(&self, out: &mut dyn Write) -> io::Result<()> {
        (**self).write_json_to(out)
    }
}

/// A marshaler that can be reset and refilled instead of reallocated.
pub trait ReusableMarshaler<B: ?Sized>: Marshaler + Recyclable {
    fn initialize(&mut self, batch: &B);
}

/// Returns an instance to its empty state before it goes back to a pool.
pub trait Recyclable: Send + 'static {
    fn reset(&mut self);
}

/// Builds marshalers for one kind of batch, in either memory mode.
pub trait MarshalerFactory<B: ?Sized>: Send + Sync + 'static {
    type Reusable: ReusableMarshaler<B>;

    /// Immutable snapshot of `batch`.
    fn create(&self, batch: &B) -> Box<dyn Marshaler>;

    /// Empty instance destined for the pool.
    fn create_reusable(&self) -> Self::Reusable;
}

/// What a sender needs from one export call's payload.
///
/// The payload does not change between attempts of the same call, so senders
/// may call [`MessageWriter::write_message`] once and reuse the bytes.
pub trait MessageWriter: Send + Sync {
    fn write_message(&self, sink: &mut dyn Write) -> io::Result<()>;

    /// `None` when the length is only known after writing.
    fn content_length(&self) -> Option<usize>;
}

/// Binds a marshaler to a payload format.
#[derive(Debug)]
pub struct MarshalerWriter<M> {
    marshaler: M,
    format: PayloadFormat,
}

impl<M: Marshaler> MarshalerWriter<M> {
    pub fn new(marshaler: M, format: PayloadFormat) -> Self {
        Self { marshaler, format }
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }
}

impl<M> Deref for MarshalerWriter<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.marshaler
    }
}

impl<M: Marshaler> MessageWriter for MarshalerWriter<M> {
    fn write_message(&self, sink: &mut dyn Write) -> io::Result<()> {
        match self.format {
            PayloadFormat::Binary => self.marshaler.write_binary_to(sink),
            PayloadFormat::Json => self.marshaler.write_json_to(sink),
        }
    }

    fn content_length(&self) -> Option<usize> {
        match self.format {
            PayloadFormat::Binary => Some(self.marshaler.binary_serialized_size()),
            PayloadFormat::Json => None,
        }
    }
}

/// A request that was encoded elsewhere; written verbatim in either format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPayload(Bytes);

impl EncodedPayload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Marshaler for EncodedPayload {
    fn binary_serialized_size(&self) -> usize {
        self.0.len()
    }

    fn write_binary_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.0)
    }

    fn write_json_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.0)
    }
}

/// Reusable counterpart of [`EncodedPayload`]; keeps its buffer capacity across resets.
#[derive(Debug, Default)]
pub struct EncodedPayloadBuffer {
    buf: Vec<u8>,
}

impl EncodedPayloadBuffer {
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Marshaler for EncodedPayloadBuffer {
    fn binary_serialized_size(&self) -> usize {
        self.buf.len()
    }

    fn write_binary_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.buf)
    }

    fn write_json_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.buf)
    }
}

impl Recyclable for EncodedPayloadBuffer {
    fn reset(&mut self) {
        self.buf.clear();
    }
}

impl ReusableMarshaler<[u8]> for EncodedPayloadBuffer {
    fn initialize(&mut self, batch: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(batch);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EncodedPayloadFactory;

impl MarshalerFactory<[u8]> for EncodedPayloadFactory {
    type Reusable = EncodedPayloadBuffer;

    fn create(&self, batch: &[u8]) -> Box<dyn Marshaler> {
        Box::new(EncodedPayload::new(Bytes::copy_from_slice(batch)))
    }

    fn create_reusable(&self) -> EncodedPayloadBuffer {
        EncodedPayloadBuffer::default()
    }
}
