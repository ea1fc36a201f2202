//! Streaming MD5 hashing helpers.
//!
//! Files are read in 64 KiB blocks and never loaded into memory whole.

use std::io;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::md5::{Md5, DIGEST_SIZE};

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

/// Compute MD5 of an entire file by streaming. Returns lowercase hex string.
pub async fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    Ok(hash_reader(&mut file).await?.finalize_hex())
}

/// Feed `reader` to EOF into a fresh hasher. [`Md5::len`] on the result is
/// the number of bytes read.
pub async fn hash_reader<R>(reader: &mut R) -> io::Result<Md5>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher)
}

/// `true` if `s` is a 32-character hex digest (either case).
pub fn is_hex_digest(s: &str) -> bool {
    s.len() == DIGEST_SIZE * 2 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
