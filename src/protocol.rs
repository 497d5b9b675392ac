//! Framed message codec for the client/server wire protocol.
//!
//! Each message on the wire is one envelope, big-endian:
//!
//! ```text
//! [4 bytes: total remaining length N, signed]
//! [4 bytes: client ID, signed, -1 = unassigned]
//! [N-4 bytes: UTF-8 text payload]
//! ```
//!
//! The length field counts the client ID field plus the payload, not
//! itself. Escape tokens in outgoing text (`\n`, `\r`, `\0` written as
//! backslash + letter) are substituted with their literal bytes before
//! the length is computed.

use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size in bytes of the length and client ID fields.
pub const FIELD_SIZE: usize = 4;

/// Size in bytes of the full envelope header (length + client ID).
pub const HEADER_SIZE: usize = 2 * FIELD_SIZE;

/// Client ID sentinel meaning "no ID assigned yet".
pub const UNASSIGNED_ID: i32 = -1;

/// Cap on the declared remaining length of a single envelope.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// One decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Client ID carried by the envelope ([`UNASSIGNED_ID`] before the
    /// server has issued one).
    pub client_id: i32,
    /// UTF-8 text payload.
    pub text: String,
}

impl Frame {
    pub fn new(client_id: i32, text: impl Into<String>) -> Self {
        Self {
            client_id,
            text: text.into(),
        }
    }
}

/// Codec errors.
///
/// End-of-stream at an envelope boundary is *not* an error: `read_frame`
/// reports it as `Ok(None)`. Everything here tears the connection down.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Stream closed in the middle of an envelope.
    #[error("stream closed mid-envelope: expected {expected} more bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// Declared length too small to hold the client ID field.
    #[error("malformed envelope length: {0}")]
    BadLength(i32),

    /// Declared length exceeds [`MAX_FRAME_SIZE`].
    #[error("envelope length {0} exceeds cap of {MAX_FRAME_SIZE} bytes")]
    TooLarge(usize),

    /// Payload is not valid UTF-8.
    #[error("envelope payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Underlying stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Replace the escape tokens `\n`, `\r` and `\0` with their literal
/// byte equivalents.
///
/// One pass, left to right, non-overlapping: the output is never
/// rescanned, so `\\n` yields a backslash followed by a newline.
/// Returns the input unchanged (borrowed) when no backslash occurs.
pub fn substitute_escapes(text: &str) -> Cow<'_, str> {
    let Some(first) = text.find('\\') else {
        return Cow::Borrowed(text);
    };

    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..first]);
    let mut rest = &text[first..];

    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        match tail.as_bytes().first() {
            Some(b'n') => {
                out.push('\n');
                rest = &tail[1..];
            }
            Some(b'r') => {
                out.push('\r');
                rest = &tail[1..];
            }
            Some(b'0') => {
                out.push('\0');
                rest = &tail[1..];
            }
            _ => {
                out.push('\\');
                rest = tail;
            }
        }
    }
    out.push_str(rest);

    Cow::Owned(out)
}

/// Encode one envelope, applying escape substitution to `text` first.
pub fn encode(client_id: i32, text: &str) -> Bytes {
    let payload = substitute_escapes(text);
    let payload = payload.as_bytes();

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_i32((FIELD_SIZE + payload.len()) as i32);
    buf.put_i32(client_id);
    buf.put_slice(payload);
    buf.freeze()
}

/// Read exactly one envelope from `reader`.
///
/// Returns `Ok(None)` when the stream is already at end-of-stream (no
/// header byte available), the clean-close case. A stream that closes
/// anywhere after the first header byte yields
/// [`ProtocolError::Truncated`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FIELD_SIZE];
    let mut filled = 0;
    while filled < FIELD_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated {
                expected: FIELD_SIZE,
                got: filled,
            });
        }
        filled += n;
    }

    let declared = i32::from_be_bytes(header);
    if declared < FIELD_SIZE as i32 {
        return Err(ProtocolError::BadLength(declared));
    }
    let remaining = declared as usize;
    if remaining > MAX_FRAME_SIZE {
        return Err(ProtocolError::TooLarge(remaining));
    }

    let mut body = vec![0u8; remaining];
    let mut filled = 0;
    while filled < remaining {
        let n = reader.read(&mut body[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated {
                expected: remaining,
                got: filled,
            });
        }
        filled += n;
    }

    let mut id_bytes = [0u8; FIELD_SIZE];
    id_bytes.copy_from_slice(&body[..FIELD_SIZE]);
    let client_id = i32::from_be_bytes(id_bytes);
    let text = String::from_utf8(body.split_off(FIELD_SIZE))?;

    Ok(Some(Frame::new(client_id, text)))
}

/// Encode and send one envelope, flushing the writer.
pub async fn write_frame<W>(
    writer: &mut W,
    client_id: i32,
    text: &str,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode(client_id, text)).await?;
    writer.flush().await?;
    Ok(())
}
