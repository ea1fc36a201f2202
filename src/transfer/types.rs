//! Wire constants and value types for the file integrity transfer.
//!
//! A frame is a fixed 40-byte header followed by the payload:
//!
//! | Offset | Length | Field          | Encoding                       |
//! |--------|--------|----------------|--------------------------------|
//! | 0      | 8      | payload length | `u64`, big-endian              |
//! | 8      | 32     | claimed digest | ASCII hex text, not decoded    |
//! | 40     | N      | payload        | raw bytes                      |
//!
//! The receiver answers with a single newline-terminated verdict line.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Length of the big-endian size field.
pub const SIZE_FIELD_LEN: usize = 8;

/// Length of the hex digest field.
pub const DIGEST_FIELD_LEN: usize = 32;

/// Total header length before the payload starts.
pub const HEADER_LEN: usize = SIZE_FIELD_LEN + DIGEST_FIELD_LEN;

pub const VERIFIED_LINE: &str = "File integrity verified.";
pub const NOT_VERIFIED_LINE: &str = "File integrity not verified.";

/// Receive-side connection phase, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Accepted,
    ReadSize,
    ReadDigest,
    ReadPayload,
    Verify,
    Respond,
    Closed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Accepted => "accepted",
            Phase::ReadSize => "read_size",
            Phase::ReadDigest => "read_digest",
            Phase::ReadPayload => "read_payload",
            Phase::Verify => "verify",
            Phase::Respond => "respond",
            Phase::Closed => "closed",
        }
    }
}

/// The receiver's answer to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    NotVerified,
}

impl Verdict {
    pub fn from_match(matched: bool) -> Self {
        if matched {
            Verdict::Verified
        } else {
            Verdict::NotVerified
        }
    }

    pub fn is_verified(self) -> bool {
        self == Verdict::Verified
    }

    /// Response text without the trailing newline.
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Verified => VERIFIED_LINE,
            Verdict::NotVerified => NOT_VERIFIED_LINE,
        }
    }

    /// Parse a response line. Trailing `\n` / `\r\n` is ignored.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim_end_matches(['\n', '\r']) {
            VERIFIED_LINE => Some(Verdict::Verified),
            NOT_VERIFIED_LINE => Some(Verdict::NotVerified),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed-size part of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub file_size: u64,
    pub claimed_digest: [u8; DIGEST_FIELD_LEN],
}

impl FrameHeader {
    /// Build a header, checking that `digest_hex` is exactly 32 hex characters.
    pub fn new(file_size: u64, digest_hex: &str) -> Result<Self, TransferError> {
        if !super::hasher::is_hex_digest(digest_hex) {
            return Err(TransferError::InvalidDigest(digest_hex.to_string()));
        }
        let mut claimed_digest = [0u8; DIGEST_FIELD_LEN];
        claimed_digest.copy_from_slice(digest_hex.as_bytes());
        Ok(Self {
            file_size,
            claimed_digest,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..SIZE_FIELD_LEN].copy_from_slice(&self.file_size.to_be_bytes());
        out[SIZE_FIELD_LEN..].copy_from_slice(&self.claimed_digest);
        out
    }

    /// Claimed digest as text, for logging. Invalid UTF-8 is replaced.
    pub fn claimed_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.claimed_digest)
    }
}

/// Outcome of comparing the received digest with the one computed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub accepted: bool,
    pub computed_digest: String,
    pub claimed_digest: String,
    /// Stored name (without directory or extension) the payload was saved under.
    pub name: String,
}

impl VerificationResult {
    /// Compare byte-for-byte, case-sensitive.
    pub fn compare(
        computed_digest: String,
        claimed: &[u8; DIGEST_FIELD_LEN],
        name: String,
    ) -> Self {
        let accepted = computed_digest.as_bytes() == claimed;
        Self {
            accepted,
            computed_digest,
            claimed_digest: String::from_utf8_lossy(claimed).into_owned(),
            name,
        }
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_match(self.accepted)
    }
}

/// Everything that can end a transfer without a verdict.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("connection closed while reading {field}")]
    Framing { field: &'static str },

    #[error("declared file size {size} exceeds limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("invalid digest {0:?}: expected 32 hex characters")]
    InvalidDigest(String),

    #[error("no response from server within {0:?}")]
    Timeout(Duration),

    #[error("server closed the connection without a verdict")]
    NoResponse,

    #[error("unexpected server response: {0:?}")]
    UnexpectedResponse(String),

    #[error("failed to persist {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}
