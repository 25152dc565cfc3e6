//! Frame encoding and decoding.
//!
//! Every packet travels as one frame:
//!
//! ```text
//! +----------------------+---------------------------+
//! | Length               | Payload                   |
//! | 1-5 bytes (varint)   | `Length` bytes of UTF-8   |
//! +----------------------+---------------------------+
//! ```
//!
//! The length is the payload's byte count as an unsigned 7-bit varint:
//! low seven bits first, high bit set on every byte but the last. A stream
//! is a plain sequence of frames with no other header.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::{
    DEFAULT_MAX_PACKET_SIZE, FrameError, LENGTH_CONTINUATION_BIT, LENGTH_VALUE_MASK,
    MAX_ENCODABLE_LENGTH, MAX_LENGTH_PREFIX_SIZE, READ_BUFFER_SIZE,
};

/// Append the varint encoding of `len` to `out`.
///
/// Callers guarantee `len <= MAX_ENCODABLE_LENGTH`.
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    debug_assert!(len <= MAX_ENCODABLE_LENGTH);
    let mut value = len as u32;
    while value >= u32::from(LENGTH_CONTINUATION_BIT) {
        out.push((value as u8 & LENGTH_VALUE_MASK) | LENGTH_CONTINUATION_BIT);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Decode a varint length from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` holds an incomplete prefix, otherwise the
/// decoded length and the number of prefix bytes consumed.
pub fn decode_length(buf: &[u8]) -> Result<Option<(usize, usize)>, FrameError> {
    let mut value: u32 = 0;
    for (i, &byte) in buf.iter().take(MAX_LENGTH_PREFIX_SIZE).enumerate() {
        // The last byte may only carry the top four bits of a u32.
        if i == MAX_LENGTH_PREFIX_SIZE - 1 && byte > 0x0F {
            return Err(FrameError::MalformedLength);
        }
        value |= u32::from(byte & LENGTH_VALUE_MASK) << (7 * i);
        if byte & LENGTH_CONTINUATION_BIT == 0 {
            let len = value as usize;
            if len > MAX_ENCODABLE_LENGTH {
                return Err(FrameError::MalformedLength);
            }
            return Ok(Some((len, i + 1)));
        }
    }
    Ok(None)
}

/// Number of bytes a packet occupies on the wire.
pub fn encoded_len(packet: &str) -> usize {
    let len = packet.len();
    let mut prefix = 1;
    let mut value = len >> 7;
    while value > 0 {
        prefix += 1;
        value >>= 7;
    }
    prefix + len
}

/// Encoder/decoder for packet frames with a size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_packet_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec that rejects payloads larger than `max_packet_size`.
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            max_packet_size: max_packet_size.min(MAX_ENCODABLE_LENGTH),
        }
    }

    /// Get the payload size limit.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn check_len(&self, len: usize) -> Result<(), FrameError> {
        if len > self.max_packet_size {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_packet_size,
            });
        }
        Ok(())
    }

    /// Append one encoded frame to `out`.
    pub fn encode(&self, packet: &str, out: &mut Vec<u8>) -> Result<(), FrameError> {
        self.check_len(packet.len())?;
        out.reserve(encoded_len(packet));
        encode_length(packet.len(), out);
        out.extend_from_slice(packet.as_bytes());
        Ok(())
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold a complete frame,
    /// otherwise the packet and the number of bytes consumed.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(String, usize)>, FrameError> {
        let Some((len, prefix)) = decode_length(buf)? else {
            return Ok(None);
        };
        self.check_len(len)?;

        let end = prefix + len;
        if buf.len() < end {
            return Ok(None);
        }

        let packet = String::from_utf8(buf[prefix..end].to_vec())?;
        Ok(Some((packet, end)))
    }

    /// Read one frame from an async byte stream.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly at a frame boundary.
    /// A stream that ends inside a frame is [`FrameError::Truncated`].
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<String>, FrameError>
    where
        R: AsyncRead + Unpin,
    {
        let mut prefix = [0u8; MAX_LENGTH_PREFIX_SIZE];
        let mut filled = 0;

        let len = loop {
            let byte = match reader.read_u8().await {
                Ok(byte) => byte,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    if filled == 0 {
                        return Ok(None);
                    }
                    return Err(FrameError::Truncated {
                        expected: filled + 1,
                        actual: filled,
                    });
                }
                Err(e) => return Err(e.into()),
            };

            prefix[filled] = byte;
            filled += 1;

            if let Some((len, _)) = decode_length(&prefix[..filled])? {
                break len;
            }
        };
        self.check_len(len)?;

        // Grow on demand so a hostile length cannot force a huge allocation.
        let mut payload = Vec::with_capacity(len.min(READ_BUFFER_SIZE));
        let read = (&mut *reader).take(len as u64).read_to_end(&mut payload).await?;
        if read < len {
            return Err(FrameError::Truncated {
                expected: len,
                actual: read,
            });
        }

        Ok(Some(String::from_utf8(payload)?))
    }

    /// Write one frame to an async byte stream and flush it.
    ///
    /// `scratch` is reused between calls to avoid an allocation per packet.
    pub async fn write_frame<W>(
        &self,
        writer: &mut W,
        packet: &str,
        scratch: &mut Vec<u8>,
    ) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin,
    {
        scratch.clear();
        self.encode(packet, scratch)?;
        writer.write_all(scratch).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(packet: &str) -> Vec<u8> {
        let mut out = Vec::new();
        FrameCodec::default().encode(packet, &mut out).unwrap();
        out
    }

    #[test]
    fn test_encode_short_packet() {
        assert_eq!(encode("A"), hex::decode("0141").unwrap());
        assert_eq!(encode(""), hex::decode("00").unwrap());
        assert_eq!(encode("é"), hex::decode("02c3a9").unwrap());
    }

    #[test]
    fn test_length_prefix_boundaries() {
        let mut out = Vec::new();
        encode_length(127, &mut out);
        assert_eq!(out, [0x7F]);

        out.clear();
        encode_length(128, &mut out);
        assert_eq!(out, [0x80, 0x01]);

        out.clear();
        encode_length(300, &mut out);
        assert_eq!(out, [0xAC, 0x02]);

        out.clear();
        encode_length(MAX_ENCODABLE_LENGTH, &mut out);
        assert_eq!(out, [0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
        assert_eq!(
            decode_length(&out).unwrap(),
            Some((MAX_ENCODABLE_LENGTH, MAX_LENGTH_PREFIX_SIZE))
        );
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(encoded_len(""), 1);
        assert_eq!(encoded_len(&"a".repeat(127)), 128);
        assert_eq!(encoded_len(&"a".repeat(128)), 130);
        assert_eq!(encoded_len(&"a".repeat(512)), encode(&"a".repeat(512)).len());
    }

    #[test]
    fn test_decode_incomplete() {
        let codec = FrameCodec::default();
        assert!(codec.decode(&[]).unwrap().is_none());
        // Prefix still continuing
        assert!(codec.decode(&[0x80]).unwrap().is_none());
        // Prefix complete, payload short
        assert!(codec.decode(&hex::decode("0341").unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_decode_consumes_one_frame() {
        let codec = FrameCodec::default();
        let mut buf = encode("first");
        buf.extend(encode("second"));

        let (packet, used) = codec.decode(&buf).unwrap().unwrap();
        assert_eq!(packet, "first");
        assert_eq!(used, 6);

        let (packet, used2) = codec.decode(&buf[used..]).unwrap().unwrap();
        assert_eq!(packet, "second");
        assert_eq!(used + used2, buf.len());
    }

    #[test]
    fn test_decode_malformed_length() {
        let codec = FrameCodec::default();
        let result = codec.decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(result, Err(FrameError::MalformedLength)));

        // Fits in 32 bits but not in a signed length
        let result = codec.decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert!(matches!(result, Err(FrameError::MalformedLength)));
    }

    #[test]
    fn test_size_limit() {
        let codec = FrameCodec::new(4);
        let mut out = Vec::new();
        assert!(codec.encode("abcd", &mut out).is_ok());
        assert!(matches!(
            codec.encode("abcde", &mut out),
            Err(FrameError::TooLarge { len: 5, max: 4 })
        ));

        // Declared length is rejected before the payload arrives
        assert!(matches!(
            codec.decode(&[0x05]),
            Err(FrameError::TooLarge { len: 5, max: 4 })
        ));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let codec = FrameCodec::default();
        let result = codec.decode(&hex::decode("01ff").unwrap());
        assert!(matches!(result, Err(FrameError::InvalidUtf8(_))));
    }

    #[tokio::test]
    async fn test_read_frames_until_eof() {
        let codec = FrameCodec::default();
        let big = "a".repeat(512);
        let mut wire = Vec::new();
        for packet in ["A", "B", big.as_str()] {
            codec.encode(packet, &mut wire).unwrap();
        }

        let mut reader = wire.as_slice();
        assert_eq!(codec.read_frame(&mut reader).await.unwrap().as_deref(), Some("A"));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap().as_deref(), Some("B"));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap(), Some(big));
        assert_eq!(codec.read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_truncated_frame() {
        let codec = FrameCodec::default();

        let mut reader: &[u8] = &[0x05, b'a', b'b'];
        let result = codec.read_frame(&mut reader).await;
        assert!(matches!(
            result,
            Err(FrameError::Truncated {
                expected: 5,
                actual: 2
            })
        ));

        let mut reader: &[u8] = &[0x80];
        let result = codec.read_frame(&mut reader).await;
        assert!(matches!(result, Err(FrameError::Truncated { .. })));
    }

    #[tokio::test]
    async fn test_write_frame() {
        let codec = FrameCodec::default();
        let mut wire: Vec<u8> = Vec::new();
        let mut scratch = Vec::new();

        codec.write_frame(&mut wire, "Test Message", &mut scratch).await.unwrap();
        codec.write_frame(&mut wire, "A", &mut scratch).await.unwrap();

        let mut expected = vec![12];
        expected.extend_from_slice(b"Test Message");
        expected.extend_from_slice(&[1, b'A']);
        assert_eq!(wire, expected);
    }
}
