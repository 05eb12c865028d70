//! `grpc-status` / `grpc-message` handling.

use std::borrow::Cow;

use http::{HeaderMap, StatusCode};
use percent_encoding::percent_decode;
use tonic::Code;

pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";

/// Codes retried by default when they arrive on an HTTP-success response.
pub const DEFAULT_RETRYABLE_CODES: [Code; 7] = [
    Code::Cancelled,
    Code::DeadlineExceeded,
    Code::ResourceExhausted,
    Code::Aborted,
    Code::OutOfRange,
    Code::Unavailable,
    Code::DataLoss,
];

fn needs_unescape(bytes: &[u8]) -> bool {
    bytes.iter().enumerate().any(|(i, &b)| {
        !(b' '..b'~').contains(&b) || (b == b'%' && i + 2 < bytes.len())
    })
}

/// Decode a `grpc-message` value.
///
/// Printable ASCII without `%` escapes is returned as-is; anything else is
/// percent-decoded and read as UTF-8, replacing invalid sequences.
pub fn unescape_grpc_message(raw: &[u8]) -> Cow<'_, str> {
    if !needs_unescape(raw) {
        // only printable ASCII remains here
        return Cow::Borrowed(std::str::from_utf8(raw).unwrap_or_default());
    }
    percent_decode(raw).decode_utf8_lossy()
}

/// Status code and message carried by a header block, if any.
pub(crate) fn read_status(headers: &HeaderMap) -> Option<(Code, Option<String>)> {
    let code = headers.get(GRPC_STATUS)?;
    let code = Code::from_bytes(code.as_bytes());
    let message = headers
        .get(GRPC_MESSAGE)
        .map(|value| unescape_grpc_message(value.as_bytes()).into_owned());
    Some((code, message))
}

/// The gRPC code a client reports when a call fails at the HTTP layer without
/// any gRPC status.
pub fn code_from_http(status: StatusCode) -> Code {
    match status.as_u16() {
        400 => Code::Internal,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::Unimplemented,
        429 | 502 | 503 | 504 => Code::Unavailable,
        _ => Code::Unknown,
    }
}
