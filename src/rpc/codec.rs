//! Message compression and length-prefixed framing.
//!
//! ```text
//! +------------+----------------+-----------------+
//! | compressed | length (u32 BE) | message bytes   |
//! |   1 byte   |    4 bytes      |  length bytes   |
//! +------------+----------------+-----------------+
//! ```

use std::fmt;
use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::error::RpcError;

pub const GRPC_ENCODING: &str = "grpc-encoding";
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";

/// Length of the frame prefix.
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest message accepted after decompression.
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Content codec applied to individual messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ContentCodec {
    #[default]
    Identity,
    Gzip,
}

impl ContentCodec {
    /// Name used in `grpc-encoding`.
    pub fn name(&self) -> &'static str {
        match self {
            ContentCodec::Identity => "identity",
            ContentCodec::Gzip => "gzip",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("identity") {
            Some(ContentCodec::Identity)
        } else if name.eq_ignore_ascii_case("gzip") {
            Some(ContentCodec::Gzip)
        } else {
            None
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, ContentCodec::Identity)
    }

    pub fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            ContentCodec::Identity => Ok(data.to_vec()),
            ContentCodec::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }

    /// Decode `data`, refusing output larger than `limit` bytes.
    pub fn decode(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, RpcError> {
        let out = match self {
            ContentCodec::Identity => data.to_vec(),
            ContentCodec::Gzip => {
                let mut out = Vec::new();
                let bound = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
                GzDecoder::new(data).take(bound).read_to_end(&mut out)?;
                out
            }
        };
        if out.len() > limit {
            return Err(RpcError::Protocol(format!(
                "{self} message exceeds {limit} bytes"
            )));
        }
        Ok(out)
    }
}

impl fmt::Display for ContentCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Frame one message. Identity messages are sent with the compressed flag
/// clear.
pub fn encode_frame(codec: ContentCodec, message: &[u8]) -> Result<Bytes, RpcError> {
    let payload = codec.encode(message)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| RpcError::Protocol(format!("message of {} bytes is too large", payload.len())))?;

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u8(u8::from(!codec.is_identity()));
    frame.put_u32(len);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Read exactly one framed message from a unary body.
///
/// `codec` is the sender's announced `grpc-encoding`; a compressed frame
/// without one is a protocol violation.
pub fn decode_frame(codec: ContentCodec, body: &[u8]) -> Result<Bytes, RpcError> {
    decode_frame_limited(codec, body, MAX_MESSAGE_BYTES)
}

/// [`decode_frame`] with an explicit bound on the decoded message.
pub fn decode_frame_limited(
    codec: ContentCodec,
    body: &[u8],
    limit: usize,
) -> Result<Bytes, RpcError> {
    if body.len() < FRAME_HEADER_LEN {
        return Err(RpcError::Protocol(format!(
            "frame header truncated: {} of {FRAME_HEADER_LEN} bytes",
            body.len()
        )));
    }
    let flag = body[0];
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let payload = &body[FRAME_HEADER_LEN..];
    if payload.len() != len {
        return Err(RpcError::Protocol(format!(
            "frame announces {len} bytes, body carries {}",
            payload.len()
        )));
    }

    match flag {
        0 if len > limit => Err(RpcError::Protocol(format!(
            "message of {len} bytes exceeds {limit} bytes"
        ))),
        0 => Ok(Bytes::copy_from_slice(payload)),
        1 if codec.is_identity() => Err(RpcError::Protocol(
            "compressed message without grpc-encoding".into(),
        )),
        1 => Ok(Bytes::from(codec.decode(payload, limit)?)),
        other => Err(RpcError::Protocol(format!("invalid compressed flag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_frame_layout() {
        let frame = encode_frame(ContentCodec::Identity, b"hello").unwrap();
        assert_eq!(&frame[..], b"\x00\x00\x00\x00\x05hello");
    }

    #[test]
    fn gzip_frame_sets_flag_and_decodes() {
        let message = vec![b'a'; 4096];
        let frame = encode_frame(ContentCodec::Gzip, &message).unwrap();
        assert_eq!(frame[0], 1);
        assert!(frame.len() < message.len());
        assert_eq!(decode_frame(ContentCodec::Gzip, &frame).unwrap(), message);
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        assert!(matches!(
            decode_frame(ContentCodec::Identity, b"\x00\x00"),
            Err(RpcError::Protocol(_))
        ));
        assert!(matches!(
            decode_frame(ContentCodec::Identity, b"\x00\x00\x00\x00\x09short"),
            Err(RpcError::Protocol(_))
        ));
        let gz = encode_frame(ContentCodec::Gzip, b"x").unwrap();
        assert!(matches!(
            decode_frame(ContentCodec::Identity, &gz),
            Err(RpcError::Protocol(_))
        ));
    }

    #[test]
    fn inflation_is_bounded() {
        let message = vec![0u8; 64 * 1024];
        let frame = encode_frame(ContentCodec::Gzip, &message).unwrap();
        assert!(frame.len() < 1024);

        match decode_frame_limited(ContentCodec::Gzip, &frame, 16 * 1024) {
            Err(RpcError::Protocol(detail)) => assert!(detail.contains("exceeds"), "{detail}"),
            other => panic!("expected a protocol error, got {other:?}"),
        }
        assert_eq!(
            decode_frame_limited(ContentCodec::Gzip, &frame, message.len()).unwrap(),
            message
        );

        let plain = encode_frame(ContentCodec::Identity, &message).unwrap();
        assert!(matches!(
            decode_frame_limited(ContentCodec::Identity, &plain, 1024),
            Err(RpcError::Protocol(_))
        ));
    }

    #[test]
    fn codec_names() {
        assert_eq!(ContentCodec::from_name(" GZIP "), Some(ContentCodec::Gzip));
        assert_eq!(ContentCodec::from_name("br"), None);
        assert_eq!(ContentCodec::default().name(), "identity");
    }
}
