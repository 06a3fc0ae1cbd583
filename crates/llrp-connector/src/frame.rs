//! LLRP message framing.
//!
//! Every LLRP message starts with a 10-byte header:
//!
//! ```text
//!  0                   1                   2                   3
//! +-----+-----+-------------------+-------------------------------+
//! |rsvd |ver  |   message type    |        message length ...     |
//! | (3) | (3) |       (10)        |            (32)               |
//! +-----+-----+-------------------+-------------------------------+
//! |  ... length  |              message id (32)                   |
//! +--------------+------------------------------------------------+
//! ```
//!
//! The length covers the whole message including the header. Framing only
//! needs the first six bytes; the message id is parsed together with the
//! body in [`crate::messages`].

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use llrp_core::error::{Error, Result};

/// LLRP protocol version 1.0.1.
pub const LLRP_VERSION: u8 = 1;

/// Bytes needed to learn a message's type and length.
pub const HEADER_PREFIX_LEN: usize = 6;

/// Full header length (prefix plus message id).
pub const HEADER_LEN: usize = 10;

/// Upper bound on a single message; anything larger is treated as garbage.
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Encode a complete LLRP message from its type, id and body.
///
/// # Example
///
/// ```
/// use llrp_connector::frame::encode_message;
///
/// // KEEPALIVE_ACK (type 72) acknowledging keepalive id 7.
/// let bytes = encode_message(72, 7, &[]);
/// assert_eq!(bytes, vec![0x04, 0x48, 0, 0, 0, 10, 0, 0, 0, 7]);
/// ```
pub fn encode_message(message_type: u16, message_id: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u16(((LLRP_VERSION as u16) << 10) | (message_type & 0x03FF));
    buf.put_u32((HEADER_LEN + body.len()) as u32);
    buf.put_u32(message_id);
    buf.put_slice(body);
    buf.to_vec()
}

/// Read the message type out of a header prefix.
pub fn header_message_type(header: &[u8]) -> u16 {
    (((header[0] & 0x03) as u16) << 8) | header[1] as u16
}

/// Read the total message length out of a header prefix.
pub fn header_length(header: &[u8]) -> u32 {
    u32::from_be_bytes([header[2], header[3], header[4], header[5]])
}

/// Reads whole LLRP messages from a byte stream.
///
/// A single socket read may deliver any fraction of a message; the decoder
/// loops until the header and then the full body have arrived.
pub struct FrameDecoder<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next complete message.
    ///
    /// Returns `Ok(None)` when the peer closes the stream cleanly between
    /// messages. A close in the middle of a message, a read error, or a
    /// length outside `HEADER_LEN..=MAX_MESSAGE_LEN` is an error.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        let mut header = [0u8; HEADER_PREFIX_LEN];
        let mut filled = 0;
        while filled < HEADER_PREFIX_LEN {
            let n = self.reader.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::Protocol(format!(
                    "stream closed after {} header bytes",
                    filled
                )));
            }
            filled += n;
        }

        let length = header_length(&header) as usize;
        if length < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "frame length {} below header size",
                length
            )));
        }
        if length > MAX_MESSAGE_LEN {
            return Err(Error::Protocol(format!(
                "frame length {} exceeds limit",
                length
            )));
        }

        let mut frame = BytesMut::zeroed(length);
        frame[..HEADER_PREFIX_LEN].copy_from_slice(&header);
        let mut filled = HEADER_PREFIX_LEN;
        while filled < length {
            let n = self.reader.read(&mut frame[filled..]).await?;
            if n == 0 {
                return Err(Error::Protocol(format!(
                    "stream closed after {} of {} bytes",
                    filled, length
                )));
            }
            filled += n;
        }

        tracing::trace!(
            message_type = header_message_type(&header),
            length,
            "Decoded frame"
        );

        Ok(Some(frame.freeze()))
    }

    /// Recover the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn sample_frame() -> Vec<u8> {
        // ADD_ROSPEC_RESPONSE (30) carrying a success LLRPStatus.
        encode_message(30, 42, &[0x01, 0x1F, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00])
    }

    #[test]
    fn encode_sets_version_type_and_length() {
        let bytes = encode_message(1023, 1, &[0xAA; 5]);
        assert_eq!(bytes[0] >> 2, LLRP_VERSION);
        assert_eq!(header_message_type(&bytes), 1023);
        assert_eq!(header_length(&bytes), 15);
        assert_eq!(bytes.len(), 15);
    }

    #[tokio::test]
    async fn decodes_whole_frame_delivered_at_once() {
        let frame = sample_frame();
        let mock = Builder::new().read(&frame).build();
        let mut decoder = FrameDecoder::new(mock);

        let got = decoder.read_frame().await.unwrap().unwrap();
        assert_eq!(&got[..], &frame[..]);
        assert!(decoder.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn decodes_across_every_chunk_size() {
        let frame = sample_frame();
        for chunk in 1..=frame.len() {
            let mut builder = Builder::new();
            for piece in frame.chunks(chunk) {
                builder.read(piece);
            }
            let mut decoder = FrameDecoder::new(builder.build());

            let got = decoder.read_frame().await.unwrap().unwrap();
            assert_eq!(&got[..], &frame[..], "chunk size {}", chunk);
            assert!(decoder.read_frame().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn back_to_back_frames_split_across_boundary() {
        let a = encode_message(62, 1, &[]);
        let b = sample_frame();
        let mut joined = a.clone();
        joined.extend_from_slice(&b);

        // Split so the first read ends inside the second frame's header.
        let (first, second) = joined.split_at(a.len() + 3);
        let mock = Builder::new().read(first).read(second).build();
        let mut decoder = FrameDecoder::new(mock);

        assert_eq!(&decoder.read_frame().await.unwrap().unwrap()[..], &a[..]);
        assert_eq!(&decoder.read_frame().await.unwrap().unwrap()[..], &b[..]);
        assert!(decoder.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clean_close_returns_none() {
        let mock = Builder::new().build();
        let mut decoder = FrameDecoder::new(mock);
        assert!(decoder.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_mid_header_is_error() {
        let mock = Builder::new().read(&[0x04, 0x3E, 0x00]).build();
        let mut decoder = FrameDecoder::new(mock);
        assert!(matches!(
            decoder.read_frame().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn close_mid_body_is_error() {
        let frame = sample_frame();
        let mock = Builder::new().read(&frame[..frame.len() - 2]).build();
        let mut decoder = FrameDecoder::new(mock);
        assert!(matches!(
            decoder.read_frame().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn zero_length_is_rejected() {
        let mock = Builder::new()
            .read(&[0x04, 0x3E, 0x00, 0x00, 0x00, 0x00])
            .build();
        let mut decoder = FrameDecoder::new(mock);
        assert!(matches!(
            decoder.read_frame().await,
            Err(Error::Protocol(msg)) if msg.contains("below header size")
        ));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let mock = Builder::new()
            .read(&[0x04, 0x3D, 0x7F, 0xFF, 0xFF, 0xFF])
            .build();
        let mut decoder = FrameDecoder::new(mock);
        assert!(matches!(
            decoder.read_frame().await,
            Err(Error::Protocol(msg)) if msg.contains("exceeds limit")
        ));
    }

    #[tokio::test]
    async fn read_error_propagates_as_io() {
        let mock = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let mut decoder = FrameDecoder::new(mock);
        assert!(matches!(decoder.read_frame().await, Err(Error::Io(_))));
    }
}
