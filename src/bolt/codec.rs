//! Chunked message framing for the Bolt protocol.
//!
//! Each message is PackStream-encoded, split into chunks of at most 65535
//! bytes, every chunk prefixed with a big-endian u16 length, and terminated
//! by a zero-length chunk.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{BoltRequest, BoltResponse};
use super::packstream::{decode, encode, Value};
use super::BoltError;

/// Maximum chunk body size (u16 length prefix)
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize;

/// End of message marker (0x00 0x00)
pub const END_MARKER: [u8; 2] = [0x00, 0x00];

/// Default cap on a reassembled message (16MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Bolt chunked framing codec.
///
/// Decodes inbound chunk streams into [`BoltResponse`]s and encodes
/// [`BoltRequest`]s into chunked frames.
#[derive(Debug)]
pub struct BoltCodec {
    /// Maximum reassembled message size
    max_message_size: usize,
    /// Buffer accumulating chunk bodies until the zero chunk
    message_buffer: BytesMut,
}

impl BoltCodec {
    /// Create a new codec with default settings.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a codec with a custom max message size.
    pub fn with_max_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            message_buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Split an encoded message into length-prefixed chunks plus terminator.
    fn encode_chunked(&self, data: &[u8], dst: &mut BytesMut) {
        dst.reserve(data.len() + 2 * (data.len() / MAX_CHUNK_SIZE + 2));
        for chunk in data.chunks(MAX_CHUNK_SIZE) {
            dst.put_u16(chunk.len() as u16);
            dst.put_slice(chunk);
        }
        dst.put_slice(&END_MARKER);
    }

    /// Decode a complete message body into a raw PackStream value.
    fn decode_value(&mut self, src: &mut BytesMut) -> Result<Option<Value>, BoltError> {
        loop {
            // Need at least the chunk header
            if src.len() < 2 {
                return Ok(None);
            }

            let chunk_size = u16::from_be_bytes([src[0], src[1]]) as usize;

            if chunk_size == 0 {
                src.advance(2);

                if self.message_buffer.is_empty() {
                    // NOOP chunk, keep reading
                    continue;
                }

                let message_data = self.message_buffer.split();
                let value = decode(&message_data).map_err(BoltError::PackStream)?;
                return Ok(Some(value));
            }

            if src.len() < 2 + chunk_size {
                return Ok(None);
            }

            if self.message_buffer.len() + chunk_size > self.max_message_size {
                return Err(BoltError::MessageTooLarge {
                    size: self.message_buffer.len() + chunk_size,
                    max: self.max_message_size,
                });
            }

            src.advance(2);
            self.message_buffer.extend_from_slice(&src[..chunk_size]);
            src.advance(chunk_size);
        }
    }
}

impl Default for BoltCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BoltCodec {
    type Item = BoltResponse;
    type Error = BoltError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode_value(src)? {
            Some(value) => {
                let structure = match value {
                    Value::Structure(s) => s,
                    other => {
                        return Err(BoltError::Protocol(format!(
                            "Expected structure, got {}",
                            other.type_name()
                        )))
                    }
                };
                let response =
                    BoltResponse::from_structure(structure).map_err(BoltError::PackStream)?;
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<BoltRequest> for BoltCodec {
    type Error = BoltError;

    fn encode(&mut self, item: BoltRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let value = Value::Structure(item.to_structure());
        let encoded = encode(&value).map_err(BoltError::PackStream)?;
        self.encode_chunked(&encoded, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::{PullMessage, RecordMessage, SuccessMessage};

    fn frame_response(response: &BoltResponse, buf: &mut BytesMut) {
        let value = Value::Structure(response.to_structure());
        let encoded = encode(&value).unwrap();
        buf.put_u16(encoded.len() as u16);
        buf.put_slice(&encoded);
        buf.put_slice(&END_MARKER);
    }

    #[test]
    fn test_encode_request_framing() {
        let mut codec = BoltCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(BoltRequest::Pull(PullMessage::all()), &mut buf)
            .unwrap();

        // Chunk header + body + end marker
        let body_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        assert_eq!(buf.len(), 2 + body_len + 2);
        assert_eq!(&buf[buf.len() - 2..], &END_MARKER);
    }

    #[test]
    fn test_decode_response() {
        let mut codec = BoltCodec::new();
        let mut buf = BytesMut::new();
        frame_response(
            &BoltResponse::Success(SuccessMessage::run_success(vec!["n"])),
            &mut buf,
        );

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            BoltResponse::Success(s) => assert_eq!(s.fields().unwrap(), vec!["n"]),
            other => panic!("expected SUCCESS, got {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_reassembles_split_chunks() {
        // One message split across three chunks must decode identically.
        let record = BoltResponse::Record(RecordMessage::new(vec![Value::String(
            "z".repeat(100),
        )]));
        let value = Value::Structure(record.to_structure());
        let encoded = encode(&value).unwrap();

        let mut buf = BytesMut::new();
        for part in encoded.chunks(40) {
            buf.put_u16(part.len() as u16);
            buf.put_slice(part);
        }
        buf.put_slice(&END_MARKER);

        let mut codec = BoltCodec::new();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            BoltResponse::Record(r) => assert_eq!(r.values[0].as_str(), Some(&"z".repeat(100)[..])),
            other => panic!("expected RECORD, got {:?}", other),
        }
    }

    #[test]
    fn test_large_message_splits_into_chunks() {
        // A query body past 65535 bytes forces multiple outbound chunks.
        let query = "x".repeat(MAX_CHUNK_SIZE * 2 + 100);
        let mut codec = BoltCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                BoltRequest::Run(crate::bolt::message::RunMessage::new(
                    &query,
                    Default::default(),
                    Default::default(),
                )),
                &mut buf,
            )
            .unwrap();

        // First chunk must be full-size
        assert_eq!(u16::from_be_bytes([buf[0], buf[1]]) as usize, MAX_CHUNK_SIZE);
        assert_eq!(&buf[buf.len() - 2..], &END_MARKER);
    }

    #[test]
    fn test_partial_input_returns_none() {
        let mut codec = BoltCodec::new();
        let mut buf = BytesMut::new();
        frame_response(&BoltResponse::Success(SuccessMessage::new()), &mut buf);

        let mut partial = BytesMut::from(&buf[..2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Single byte is not even a chunk header
        let mut one = BytesMut::from(&buf[..1]);
        assert!(codec.decode(&mut one).unwrap().is_none());

        let decoded = codec.decode(&mut buf).unwrap();
        assert!(decoded.unwrap().is_success());
    }

    #[test]
    fn test_noop_chunk_skipped() {
        let mut codec = BoltCodec::new();
        let mut buf = BytesMut::new();

        buf.put_slice(&END_MARKER); // empty message (NOOP)
        frame_response(&BoltResponse::Ignored, &mut buf);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded, BoltResponse::Ignored));
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = BoltCodec::with_max_size(100);
        let mut buf = BytesMut::new();

        buf.put_u16(200);
        buf.extend_from_slice(&[0u8; 200]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(BoltError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_non_structure_message_rejected() {
        let mut buf = BytesMut::new();
        let encoded = encode(&Value::Integer(42)).unwrap();
        buf.put_u16(encoded.len() as u16);
        buf.put_slice(&encoded);
        buf.put_slice(&END_MARKER);

        let mut codec = BoltCodec::new();
        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(BoltError::Protocol(_))));
    }

    #[test]
    fn test_multiple_messages() {
        let mut codec = BoltCodec::new();
        let mut buf = BytesMut::new();

        frame_response(
            &BoltResponse::Record(RecordMessage::new(vec![Value::Integer(1)])),
            &mut buf,
        );
        frame_response(
            &BoltResponse::Record(RecordMessage::new(vec![Value::Integer(2)])),
            &mut buf,
        );
        frame_response(
            &BoltResponse::Success(SuccessMessage::streaming_success(false, None)),
            &mut buf,
        );

        assert!(codec.decode(&mut buf).unwrap().unwrap().is_record());
        assert!(codec.decode(&mut buf).unwrap().unwrap().is_record());
        assert!(codec.decode(&mut buf).unwrap().unwrap().is_success());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
