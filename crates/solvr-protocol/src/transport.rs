//! Frame assembly for inbound bytes and the outbound command codec.
//!
//! Two boundary policies are supported:
//!
//! - [`FramingMode::Chunk`]: a frame is whatever the transport delivered in one
//!   read. This is what the deployed server speaks; a reply split across two
//!   reads, or two replies coalesced into one read, will not decode.
//! - [`FramingMode::Line`]: every message is terminated by `\n`, in both
//!   directions. Partial and coalesced reads are reassembled correctly.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::error::EncodeError;
use crate::protocol::{self, OutboundCommand};

/// Maximum size of a single frame (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame terminator used by [`FramingMode::Line`]
pub const LINE_TERMINATOR: u8 = b'\n';

/// How frame boundaries are detected on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// One transport read is one frame.
    #[default]
    Chunk,
    /// Frames are terminated by a newline.
    Line,
}

impl std::fmt::Display for FramingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingMode::Chunk => write!(f, "chunk"),
            FramingMode::Line => write!(f, "line"),
        }
    }
}

impl std::str::FromStr for FramingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chunk" => Ok(FramingMode::Chunk),
            "line" => Ok(FramingMode::Line),
            other => Err(format!("unknown framing mode '{other}' (expected chunk or line)")),
        }
    }
}

/// Accumulates bytes from the read path and hands out complete frames.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    mode: FramingMode,
    buffer: BytesMut,
    discarded: usize,
}

impl FrameAssembler {
    #[must_use]
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            buffer: BytesMut::new(),
            discarded: 0,
        }
    }

    /// Number of bytes received but not yet handed out as a frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes thrown away because an unterminated line exceeded
    /// [`MAX_FRAME_SIZE`].
    #[must_use]
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Append one delivery from the transport.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Remove and return every frame that is complete under the current mode.
    pub fn take_ready_frames(&mut self) -> Vec<Bytes> {
        match self.mode {
            FramingMode::Chunk => {
                if self.buffer.is_empty() {
                    Vec::new()
                } else {
                    vec![self.buffer.split().freeze()]
                }
            }
            FramingMode::Line => self.take_lines(),
        }
    }

    fn take_lines(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == LINE_TERMINATOR) {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            if !line.is_empty() {
                frames.push(line.freeze());
            }
        }

        if self.buffer.len() > MAX_FRAME_SIZE {
            warn!(
                "Discarding {} buffered bytes without a line terminator",
                self.buffer.len()
            );
            self.discarded += self.buffer.len();
            self.buffer.clear();
        }

        frames
    }
}

/// Encodes [`OutboundCommand`]s for a `FramedWrite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandCodec {
    mode: FramingMode,
}

impl CommandCodec {
    #[must_use]
    pub fn new(mode: FramingMode) -> Self {
        Self { mode }
    }
}

impl Encoder<OutboundCommand> for CommandCodec {
    type Error = CodecError;

    fn encode(&mut self, item: OutboundCommand, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = protocol::encode(&item)?;

        if text.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(text.len()));
        }

        dst.reserve(text.len() + 1);
        dst.put_slice(text.as_bytes());
        if self.mode == FramingMode::Line {
            dst.put_u8(LINE_TERMINATOR);
        }

        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Sign;
    use proptest::prelude::*;

    fn login() -> OutboundCommand {
        OutboundCommand::Login {
            login: "alice".to_string(),
            password_hash: "ab12".to_string(),
        }
    }

    #[test]
    fn test_chunk_mode_one_delivery_is_one_frame() {
        let mut assembler = FrameAssembler::new(FramingMode::Chunk);
        assembler.append(b"auth|ok");

        let frames = assembler.take_ready_frames();
        assert_eq!(frames, vec![Bytes::from_static(b"auth|ok")]);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_chunk_mode_does_not_split_coalesced_delivery() {
        let mut assembler = FrameAssembler::new(FramingMode::Chunk);
        assembler.append(b"auth|okanswer|1");

        let frames = assembler.take_ready_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"auth|okanswer|1");
    }

    #[test]
    fn test_chunk_mode_joins_appends_before_take() {
        let mut assembler = FrameAssembler::new(FramingMode::Chunk);
        assembler.append(b"answer|");
        assembler.append(b"12$-4");

        let frames = assembler.take_ready_frames();
        assert_eq!(frames, vec![Bytes::from_static(b"answer|12$-4")]);
    }

    #[test]
    fn test_empty_delivery_yields_no_frame() {
        let mut assembler = FrameAssembler::new(FramingMode::Chunk);
        assembler.append(b"");
        assert!(assembler.take_ready_frames().is_empty());

        let mut assembler = FrameAssembler::new(FramingMode::Line);
        assembler.append(b"");
        assert!(assembler.take_ready_frames().is_empty());
    }

    #[test]
    fn test_line_mode_reassembles_split_message() {
        let mut assembler = FrameAssembler::new(FramingMode::Line);
        assembler.append(b"answer|1");
        assert!(assembler.take_ready_frames().is_empty());
        assert_eq!(assembler.buffered(), 8);

        assembler.append(b"2$-4\n");
        let frames = assembler.take_ready_frames();
        assert_eq!(frames, vec![Bytes::from_static(b"answer|12$-4")]);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_line_mode_splits_coalesced_messages() {
        let mut assembler = FrameAssembler::new(FramingMode::Line);
        assembler.append(b"auth|ok\r\nanswer|3\n\nreg");

        let frames = assembler.take_ready_frames();
        assert_eq!(
            frames,
            vec![Bytes::from_static(b"auth|ok"), Bytes::from_static(b"answer|3")]
        );
        assert_eq!(assembler.buffered(), 3);
    }

    #[test]
    fn test_line_mode_discards_oversized_tail() {
        let mut assembler = FrameAssembler::new(FramingMode::Line);
        assembler.append(&vec![b'x'; MAX_FRAME_SIZE + 1]);

        assert!(assembler.take_ready_frames().is_empty());
        assert_eq!(assembler.buffered(), 0);
        assert_eq!(assembler.discarded(), MAX_FRAME_SIZE + 1);
    }

    #[test]
    fn test_encoder_chunk_mode_writes_bare_text() {
        let mut codec = CommandCodec::new(FramingMode::Chunk);
        let mut buf = BytesMut::new();

        codec.encode(login(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"login|alice$ab12");
    }

    #[test]
    fn test_encoder_line_mode_appends_terminator() {
        let mut codec = CommandCodec::new(FramingMode::Line);
        let mut buf = BytesMut::new();

        let cmd = OutboundCommand::SolveLinear {
            sign_a: Sign::Minus,
            a: "3".to_string(),
            sign_b: Sign::Plus,
            b: "9".to_string(),
        };
        codec.encode(cmd, &mut buf).unwrap();
        assert_eq!(&buf[..], b"equation|linear|-3$+9\n");
    }

    #[test]
    fn test_encoder_rejects_delimiter_without_writing() {
        let mut codec = CommandCodec::new(FramingMode::Chunk);
        let mut buf = BytesMut::new();

        let cmd = OutboundCommand::Login {
            login: "bad|name".to_string(),
            password_hash: "ab12".to_string(),
        };
        let result = codec.encode(cmd, &mut buf);
        assert!(matches!(result, Err(CodecError::Encode(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encoder_rejects_newline_in_field_without_writing() {
        let mut codec = CommandCodec::new(FramingMode::Line);
        let mut buf = BytesMut::new();

        let cmd = OutboundCommand::ResetRequestCode {
            email: "a@b.c\nauth".to_string(),
        };
        let result = codec.encode(cmd, &mut buf);
        assert!(matches!(
            result,
            Err(CodecError::Encode(EncodeError::ControlCharacter { field: "email" }))
        ));
        assert!(buf.is_empty());

        let cmd = OutboundCommand::Login {
            login: "alice\r".to_string(),
            password_hash: "ab12".to_string(),
        };
        assert!(codec.encode(cmd, &mut buf).is_err());
        assert!(buf.is_empty());

        // Whatever the encoder does accept arrives as exactly one line.
        let mut assembler = FrameAssembler::new(FramingMode::Line);
        codec
            .encode(
                OutboundCommand::ResetRequestCode {
                    email: "a@b.c".to_string(),
                },
                &mut buf,
            )
            .unwrap();
        assembler.append(&buf);
        assert_eq!(assembler.take_ready_frames().len(), 1);
    }

    #[test]
    fn test_encoder_rejects_oversized_command() {
        let mut codec = CommandCodec::new(FramingMode::Chunk);
        let mut buf = BytesMut::new();

        let cmd = OutboundCommand::ResetRequestCode {
            email: "a".repeat(MAX_FRAME_SIZE),
        };
        let result = codec.encode(cmd, &mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }

    #[test]
    fn test_framing_mode_parse_and_display() {
        assert_eq!("chunk".parse::<FramingMode>(), Ok(FramingMode::Chunk));
        assert_eq!("LINE".parse::<FramingMode>(), Ok(FramingMode::Line));
        assert!("length".parse::<FramingMode>().is_err());
        assert_eq!(FramingMode::Line.to_string(), "line");
    }

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::FrameTooLarge(2_000_000);
        assert!(err.to_string().contains("2000000"));
        assert!(err.to_string().contains("too large"));
    }

    proptest! {
        #[test]
        fn prop_chunk_mode_conserves_bytes(
            deliveries in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..64),
                0..16,
            ),
            take_every in 1usize..4,
        ) {
            let mut assembler = FrameAssembler::new(FramingMode::Chunk);
            let mut consumed = Vec::new();

            for (i, delivery) in deliveries.iter().enumerate() {
                assembler.append(delivery);
                if i % take_every == 0 {
                    for frame in assembler.take_ready_frames() {
                        prop_assert!(!frame.is_empty());
                        consumed.extend_from_slice(&frame);
                    }
                }
            }
            for frame in assembler.take_ready_frames() {
                consumed.extend_from_slice(&frame);
            }

            let appended: Vec<u8> = deliveries.concat();
            prop_assert_eq!(consumed, appended);
        }

        #[test]
        fn prop_line_mode_recovers_messages_across_any_split(
            messages in proptest::collection::vec("[a-z|$0-9]{1,20}", 1..8),
            split_at in 0usize..200,
        ) {
            let wire: Vec<u8> = messages
                .iter()
                .flat_map(|m| m.bytes().chain(std::iter::once(LINE_TERMINATOR)))
                .collect();
            let split_at = split_at.min(wire.len());

            let mut assembler = FrameAssembler::new(FramingMode::Line);
            assembler.append(&wire[..split_at]);
            let mut frames = assembler.take_ready_frames();
            assembler.append(&wire[split_at..]);
            frames.extend(assembler.take_ready_frames());

            let decoded: Vec<String> = frames
                .iter()
                .map(|f| String::from_utf8(f.to_vec()).unwrap())
                .collect();
            prop_assert_eq!(decoded, messages);
            prop_assert_eq!(assembler.buffered(), 0);
        }
    }
}
