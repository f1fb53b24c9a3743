use bytes::{Buf, Bytes, BytesMut};
use sprelay_core::error::{RelayError, Result};

/// Size of the length prefix in front of every message
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Upper bound on what one incomplete message may pre-allocate
const MAX_RESERVE: usize = 1024 * 1024;

/// Encode one message: `[size: u64 BE][payload]`
pub fn encode_message(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// SP message decoder
///
/// Works on an accumulating buffer: bytes read from the stream are appended
/// to `src` and whole messages are split off the front. A message is returned
/// zero-copy as a frozen slice of the buffer.
#[derive(Debug, Clone)]
pub struct SpDecoder {
    max_size: Option<usize>,
}

impl SpDecoder {
    #[must_use]
    pub const fn new(max_size: Option<usize>) -> Self {
        Self { max_size }
    }

    /// Decode a single message from `src`
    ///
    /// Returns:
    /// - Ok(Some(msg)) → message decoded and removed from `src`
    /// - Ok(None) → need more data
    /// - Err → announced size exceeds the limit
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = &src[..LENGTH_PREFIX_SIZE];
        let size = prefix.get_u64();

        if let Some(max) = self.max_size {
            if size > max as u64 {
                return Err(RelayError::MessageTooLarge { size, max });
            }
        }

        let body_len = usize::try_from(size).map_err(|_| RelayError::MessageTooLarge {
            size,
            max: usize::MAX,
        })?;

        if src.len() - LENGTH_PREFIX_SIZE < body_len {
            // Reserve up front so a large message is not regrown per read
            let missing = body_len - (src.len() - LENGTH_PREFIX_SIZE);
            src.reserve(missing.min(MAX_RESERVE));
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(body_len).freeze()))
    }
}

impl Default for SpDecoder {
    fn default() -> Self {
        Self::new(Some(sprelay_core::options::DEFAULT_MAX_MSG_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let wire = encode_message(b"hello");
        assert_eq!(&wire[..8], &5u64.to_be_bytes());
        assert_eq!(&wire[8..], b"hello");
    }

    #[test]
    fn test_decode_empty_message() {
        let mut buf = BytesMut::from(&encode_message(b"")[..]);
        let msg = SpDecoder::default().decode(&mut buf).unwrap().unwrap();
        assert!(msg.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_back_to_back() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_message(b"one"));
        buf.extend_from_slice(&encode_message(b"two"));

        let decoder = SpDecoder::default();
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), "one");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), "two");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_fragmented() {
        let wire = encode_message(b"fragmented payload");
        let decoder = SpDecoder::default();
        let mut buf = BytesMut::new();

        // Feed one byte at a time; only the last byte completes the message
        for (i, byte) in wire.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let out = decoder.decode(&mut buf).unwrap();
            if i + 1 < wire.len() {
                assert!(out.is_none());
            } else {
                assert_eq!(out.unwrap(), "fragmented payload");
            }
        }
    }

    #[test]
    fn test_decode_rejects_oversize() {
        let decoder = SpDecoder::new(Some(4));
        let mut buf = BytesMut::from(&encode_message(b"too long")[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(RelayError::MessageTooLarge { size: 8, max: 4 })
        ));
    }

    #[test]
    fn test_decode_unlimited() {
        let payload = vec![0xAB; 3 * 1024 * 1024];
        let mut buf = BytesMut::from(&encode_message(&payload)[..]);
        let msg = SpDecoder::new(None).decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.len(), payload.len());
    }
}
