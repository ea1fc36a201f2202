//! Streaming MD5 digest engine.
//!
//! [`Md5`] keeps the running 4-word accumulator, up to 63 bytes of input that
//! have not yet filled a block, and the total number of bytes fed. Input may
//! arrive in chunks of any size; the digest only depends on the concatenation.
//!
//! Finalization works on a copy, so a live [`Md5`] can be finalized, fed more
//! data, and finalized again.
//!
//! MD5 is used here to detect accidental corruption in transit. It is not
//! collision resistant and says nothing about who produced the data.
//!
//! ```
//! use md5fic::md5::{self, Md5};
//!
//! let mut hasher = Md5::new();
//! hasher.update(b"a");
//! hasher.update(b"bc");
//! assert_eq!(hasher.finalize(), md5::digest_of(b"abc"));
//! assert_eq!(hasher.finalize_hex(), "900150983cd24fb0d6963f7d28e17f72");
//! ```

pub mod block;

use std::io;

/// Size of an MD5 digest in bytes.
pub const DIGEST_SIZE: usize = 16;

/// Size of one compression block in bytes.
pub const BLOCK_SIZE: usize = 64;

/// Accumulator value before any input.
pub const INITIAL_STATE: [u32; 4] = [0x6745_2301, 0xEFCD_AB89, 0x98BA_DCFE, 0x1032_5476];

const STATE_TAG: &[u8; 4] = b"md5\x01";

/// Length of the buffer produced by [`Md5::to_bytes`].
pub const MARSHALED_SIZE: usize = STATE_TAG.len() + 4 * 4 + BLOCK_SIZE + 8;

/// Errors restoring a serialized hash state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("{0}")]
    Format(&'static str),
}

/// Running MD5 state.
#[derive(Debug, Clone, Copy)]
pub struct Md5 {
    state: [u32; 4],
    buffer: [u8; BLOCK_SIZE],
    buffered: usize,
    total_len: u64,
}

/// Two states are equal when they would produce the same digest for any
/// further input. Buffer bytes past `buffered` are stale and ignored.
impl PartialEq for Md5 {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
            && self.total_len == other.total_len
            && self.buffered == other.buffered
            && self.buffer[..self.buffered] == other.buffer[..other.buffered]
    }
}

impl Eq for Md5 {}

impl Default for Md5 {
    fn default() -> Self {
        Self::new()
    }
}

impl Md5 {
    pub fn new() -> Self {
        Self {
            state: INITIAL_STATE,
            buffer: [0; BLOCK_SIZE],
            buffered: 0,
            total_len: 0,
        }
    }

    /// Discard all input and return to the initial state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Total number of bytes fed so far.
    pub fn len(&self) -> u64 {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// Append `data` to the input stream.
    pub fn update(&mut self, mut data: &[u8]) {
        self.total_len = self.total_len.wrapping_add(data.len() as u64);

        if self.buffered > 0 {
            let take = (BLOCK_SIZE - self.buffered).min(data.len());
            self.buffer[self.buffered..self.buffered + take].copy_from_slice(&data[..take]);
            self.buffered += take;
            data = &data[take..];
            if self.buffered < BLOCK_SIZE {
                return;
            }
            block::compress(&mut self.state, &self.buffer);
            self.buffered = 0;
        }

        let whole = data.len() - data.len() % BLOCK_SIZE;
        block::compress(&mut self.state, &data[..whole]);

        let rest = &data[whole..];
        self.buffer[..rest.len()].copy_from_slice(rest);
        self.buffered = rest.len();
    }

    /// Digest of everything fed so far. `self` is left untouched.
    ///
    /// # Panics
    ///
    /// If the padding arithmetic leaves a partial block behind. That is a bug
    /// in this module, not a condition callers can handle.
    pub fn finalize(&self) -> [u8; DIGEST_SIZE] {
        let mut tail = *self;
        let bit_len = self.total_len << 3;

        // 0x80, zeros up to 56 mod 64, then the bit length.
        let pad = (BLOCK_SIZE + 55 - self.buffered) % BLOCK_SIZE;
        let mut padding = [0u8; 1 + 63 + 8];
        padding[0] = 0x80;
        padding[1 + pad..1 + pad + 8].copy_from_slice(&bit_len.to_le_bytes());
        tail.update(&padding[..1 + pad + 8]);

        assert_eq!(tail.buffered, 0, "md5: partial block left after padding");

        let mut out = [0u8; DIGEST_SIZE];
        for (bytes, word) in out.chunks_exact_mut(4).zip(tail.state) {
            bytes.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Lowercase hex form of [`Md5::finalize`].
    pub fn finalize_hex(&self) -> String {
        hex::encode(self.finalize())
    }

    /// Serialize the running state so hashing can resume in another process.
    pub fn to_bytes(&self) -> [u8; MARSHALED_SIZE] {
        let mut out = [0u8; MARSHALED_SIZE];
        out[..4].copy_from_slice(STATE_TAG);
        for (bytes, word) in out[4..20].chunks_exact_mut(4).zip(self.state) {
            bytes.copy_from_slice(&word.to_be_bytes());
        }
        out[20..20 + self.buffered].copy_from_slice(&self.buffer[..self.buffered]);
        out[20 + BLOCK_SIZE..].copy_from_slice(&self.total_len.to_be_bytes());
        out
    }

    /// Restore a state produced by [`Md5::to_bytes`].
    pub fn from_bytes(b: &[u8]) -> Result<Self, DigestError> {
        if b.len() < STATE_TAG.len() || &b[..STATE_TAG.len()] != STATE_TAG {
            return Err(DigestError::Format("invalid hash state identifier"));
        }
        if b.len() != MARSHALED_SIZE {
            return Err(DigestError::Format("invalid hash state size"));
        }

        let mut state = [0u32; 4];
        for (word, bytes) in state.iter_mut().zip(b[4..20].chunks_exact(4)) {
            *word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        let mut buffer = [0u8; BLOCK_SIZE];
        buffer.copy_from_slice(&b[20..20 + BLOCK_SIZE]);
        let mut len = [0u8; 8];
        len.copy_from_slice(&b[20 + BLOCK_SIZE..]);
        let total_len = u64::from_be_bytes(len);

        #[allow(clippy::cast_possible_truncation)]
        let buffered = (total_len % BLOCK_SIZE as u64) as usize;

        Ok(Self {
            state,
            buffer,
            buffered,
            total_len,
        })
    }
}

impl io::Write for Md5 {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One-shot digest of `data`.
pub fn digest_of(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize()
}

/// One-shot digest of `data` as lowercase hex.
pub fn hex_digest_of(data: &[u8]) -> String {
    hex::encode(digest_of(data))
}
