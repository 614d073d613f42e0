//! Error types for the solvr-protocol crate.

/// A command could not be turned into wire text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("Field '{field}' contains a protocol delimiter ('|' or '$')")]
    IllegalDelimiter { field: &'static str },

    #[error("Field '{field}' contains a control character")]
    ControlCharacter { field: &'static str },
}

/// A frame did not match any known server response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unrecognized frame: {frame:?}")]
    Unrecognized { frame: String },
}

impl DecodeError {
    /// Build an `Unrecognized` error, keeping a lossy copy of the frame for logs.
    #[must_use]
    pub fn unrecognized(frame: &[u8]) -> Self {
        Self::Unrecognized {
            frame: String::from_utf8_lossy(frame).into_owned(),
        }
    }
}
