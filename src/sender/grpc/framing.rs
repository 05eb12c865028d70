//! Length-prefixed message framing for unary gRPC calls.
//!
//! ```text
//! +------+----------------+-----------------+
//! | flag | length (u32 BE)| message bytes   |
//! +------+----------------+-----------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::compression::Compressor;
use crate::error::TransportError;
use crate::marshal::MessageWriter;
use crate::sender::{compress_payload, write_payload};

pub const HEADER_SIZE: usize = 5;
pub const FLAG_UNCOMPRESSED: u8 = 0;
pub const FLAG_COMPRESSED: u8 = 1;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub compressed: bool,
    pub message: Bytes,
}

fn frame_length(len: usize) -> Result<u32, TransportError> {
    u32::try_from(len).map_err(|_| {
        TransportError::InvalidRequest(format!("message of {len} bytes exceeds the gRPC frame limit"))
    })
}

/// Encode one request message.
///
/// With a compressor the message is compressed into a scratch buffer first so
/// the header carries the compressed length. Without one the writer must know
/// its length up front.
pub fn encode(
    writer: &dyn MessageWriter,
    compressor: Option<&dyn Compressor>,
) -> Result<Bytes, TransportError> {
    match compressor {
        Some(compressor) => {
            let compressed = compress_payload(writer, compressor)?;
            let len = frame_length(compressed.len())?;
            let mut frame = BytesMut::with_capacity(HEADER_SIZE + compressed.len());
            frame.put_u8(FLAG_COMPRESSED);
            frame.put_u32(len);
            frame.extend_from_slice(&compressed);
            Ok(frame.freeze())
        }
        None => {
            let expected = writer.content_length().ok_or_else(|| {
                TransportError::InvalidRequest(
                    "uncompressed gRPC messages require a known content length".to_string(),
                )
            })?;
            let len = frame_length(expected)?;
            let mut frame = BytesMut::with_capacity(HEADER_SIZE + expected);
            frame.put_u8(FLAG_UNCOMPRESSED);
            frame.put_u32(len);
            let mut sink = frame.writer();
            write_payload(writer, &mut sink)?;
            let frame = sink.into_inner();
            let written = frame.len() - HEADER_SIZE;
            if written != expected {
                return Err(TransportError::Marshal(format!(
                    "payload declared {expected} bytes but wrote {written}"
                )));
            }
            Ok(frame.freeze())
        }
    }
}

/// Decode the first frame of a response body. An empty body yields `None`.
pub fn decode(mut body: Bytes) -> Result<Option<Frame>, TransportError> {
    if body.is_empty() {
        return Ok(None);
    }
    if body.len() < HEADER_SIZE {
        return Err(TransportError::Protocol(format!(
            "truncated gRPC frame header ({} bytes)",
            body.len()
        )));
    }
    let compressed = match body.get_u8() {
        FLAG_UNCOMPRESSED => false,
        FLAG_COMPRESSED => true,
        flag => {
            return Err(TransportError::Protocol(format!(
                "invalid gRPC compression flag {flag:#x}"
            )))
        }
    };
    let len = body.get_u32() as usize;
    if body.len() < len {
        return Err(TransportError::Protocol(format!(
            "gRPC frame declares {len} bytes but only {} are present",
            body.len()
        )));
    }
    Ok(Some(Frame {
        compressed,
        message: body.split_to(len),
    }))
}
