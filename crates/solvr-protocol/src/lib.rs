//! Wire protocol definitions for the solvr equation service.
//!
//! This crate is pure: it turns commands into wire text, turns wire text into
//! typed events, and finds frame boundaries in a byte stream. It performs no I/O.
//!
//! # Architecture
//!
//! - [`protocol`]: `OutboundCommand`, `InboundEvent`, and the `encode`/`decode` pair
//! - [`transport`]: `FrameAssembler` for the read path, `CommandCodec` for the write path
//! - [`error`]: encode and decode errors
//!
//! # Example
//!
//! ```
//! use solvr_protocol::{InboundEvent, OutboundCommand, Sign, decode, encode};
//!
//! let cmd = OutboundCommand::SolveLinear {
//!     sign_a: Sign::Plus,
//!     a: "2".to_string(),
//!     sign_b: Sign::Minus,
//!     b: "8".to_string(),
//! };
//! assert_eq!(encode(&cmd).unwrap(), "equation|linear|+2$-8");
//!
//! let event = decode(b"answer|4").unwrap();
//! assert_eq!(event, InboundEvent::EquationOk { values: vec!["4".to_string()] });
//! ```

pub mod error;
pub mod protocol;
pub mod transport;

pub use error::{DecodeError, EncodeError};
pub use protocol::{
    EventKind, FAILURE_REASONS, FIELD_SEPARATOR, InboundEvent, OutboundCommand, Sign,
    VERB_SEPARATOR, decode, encode,
};
pub use transport::{
    CodecError, CommandCodec, FrameAssembler, FramingMode, LINE_TERMINATOR, MAX_FRAME_SIZE,
};
