// Codec errors for the data-channel frame
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the fixed 8-byte preamble
    TooShort { len: usize },
    /// Preamble declares more header/payload bytes than the datagram holds
    LengthMismatch { declared: usize, available: usize },
    /// Header or payload does not fit the 16-bit length field
    TooLarge { field: &'static str, len: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort { len } => {
                write!(f, "frame too short: {} bytes, preamble needs {}", len, crate::PREAMBLE_LEN)
            }
            FrameError::LengthMismatch { declared, available } => write!(
                f,
                "frame declares {} bytes of header and payload but only {} are present",
                declared, available
            ),
            FrameError::TooLarge { field, len } => {
                write!(f, "{} of {} bytes exceeds the 16-bit length field", field, len)
            }
        }
    }
}

impl std::error::Error for FrameError {}
