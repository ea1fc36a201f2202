//! Send side of a transfer.
//!
//! Writes the size, the digest text and the payload, once and in that order,
//! then waits a bounded time for the single verdict line.

use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use super::hasher;
use super::types::{FrameHeader, TransferError, Verdict};

/// Longest verdict line we are willing to buffer.
const MAX_RESPONSE_LEN: u64 = 256;

/// Send `path` with a precomputed `digest_hex` and return the server's verdict.
///
/// The digest is validated before anything touches the network. The payload
/// is streamed from disk.
pub async fn send_file<A>(
    addr: A,
    path: &Path,
    digest_hex: &str,
    timeout: Duration,
) -> Result<Verdict, TransferError>
where
    A: ToSocketAddrs,
{
    let file = File::open(path).await?;
    let header = FrameHeader::new(file.metadata().await?.len(), digest_hex)?;
    send_open_file(addr, path, file, &header, timeout).await
}

/// Hash `path`, then send it. Returns the digest that was sent.
///
/// The file is opened once: hashed, rewound and streamed from the same handle.
/// The size sent is the number of bytes that were hashed.
pub async fn send_file_hashed<A>(
    addr: A,
    path: &Path,
    timeout: Duration,
) -> Result<(String, Verdict), TransferError>
where
    A: ToSocketAddrs,
{
    let mut file = File::open(path).await?;
    let hasher = hasher::hash_reader(&mut file).await?;
    let digest = hasher.finalize_hex();
    debug!(path = %path.display(), digest = %digest, "Computed digest");

    file.rewind().await?;
    let header = FrameHeader::new(hasher.len(), &digest)?;
    let verdict = send_open_file(addr, path, file, &header, timeout).await?;
    Ok((digest, verdict))
}

async fn send_open_file<A>(
    addr: A,
    path: &Path,
    mut file: File,
    header: &FrameHeader,
    timeout: Duration,
) -> Result<Verdict, TransferError>
where
    A: ToSocketAddrs,
{
    let mut stream = TcpStream::connect(addr).await?;
    let peer = stream.peer_addr().ok();

    write_frame(&mut stream, header, &mut file).await?;
    info!(
        path = %path.display(),
        file_size = header.file_size,
        peer = ?peer,
        "File sent"
    );

    read_verdict(&mut stream, timeout).await
}

/// Write one complete frame, copying exactly `header.file_size` bytes of
/// payload from `payload`.
///
/// A payload that ends early is an `UnexpectedEof` error; the peer is left
/// waiting for bytes that will never arrive and sends no verdict.
pub async fn write_frame<W, R>(
    writer: &mut W,
    header: &FrameHeader,
    payload: &mut R,
) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    writer.write_all(&header.encode()).await?;
    let copied = tokio::io::copy(&mut payload.take(header.file_size), writer).await?;
    if copied < header.file_size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("payload ended after {copied} of {} bytes", header.file_size),
        )
        .into());
    }
    writer.flush().await?;
    Ok(())
}

/// Wait up to `timeout` for a single verdict line.
pub async fn read_verdict<R>(reader: &mut R, timeout: Duration) -> Result<Verdict, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    let mut limited = BufReader::new(reader.take(MAX_RESPONSE_LEN));
    let n = tokio::time::timeout(timeout, limited.read_line(&mut line))
        .await
        .map_err(|_| TransferError::Timeout(timeout))??;

    if n == 0 {
        return Err(TransferError::NoResponse);
    }
    Verdict::parse(&line).ok_or(TransferError::UnexpectedResponse(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frame_bytes_in_order() {
        let (mut client, mut server) = duplex(1024);
        let header = FrameHeader::new(3, "900150983cd24fb0d6963f7d28e17f72").unwrap();
        write_frame(&mut client, &header, &mut &b"abc"[..]).await.unwrap();
        drop(client);

        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire.len(), 8 + 32 + 3);
        assert_eq!(&wire[..8], &3u64.to_be_bytes());
        assert_eq!(&wire[8..40], b"900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(&wire[40..], b"abc");
    }

    #[tokio::test]
    async fn frame_copies_declared_size_only() {
        let (mut client, mut server) = duplex(1024);
        let header = FrameHeader::new(3, "900150983cd24fb0d6963f7d28e17f72").unwrap();
        write_frame(&mut client, &header, &mut &b"abcdef"[..])
            .await
            .unwrap();
        drop(client);

        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();
        assert_eq!(&wire[40..], b"abc");
    }

    #[tokio::test]
    async fn short_payload_is_an_error() {
        let (mut client, _server) = duplex(1024);
        let header = FrameHeader::new(10, "900150983cd24fb0d6963f7d28e17f72").unwrap();
        let err = write_frame(&mut client, &header, &mut &b"abc"[..])
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransferError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
        );
    }

    #[tokio::test]
    async fn hashed_send_streams_what_it_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut size = [0u8; 8];
            socket.read_exact(&mut size).await.unwrap();
            let mut digest = [0u8; 32];
            socket.read_exact(&mut digest).await.unwrap();
            let mut payload = vec![0u8; usize::try_from(u64::from_be_bytes(size)).unwrap()];
            socket.read_exact(&mut payload).await.unwrap();
            socket
                .write_all(b"File integrity verified.\n")
                .await
                .unwrap();
            (String::from_utf8(digest.to_vec()).unwrap(), payload)
        });

        let (digest, verdict) = send_file_hashed(addr, &path, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Verified);

        let (sent_digest, payload) = peer.await.unwrap();
        assert_eq!(sent_digest, digest);
        assert_eq!(digest, crate::md5::hex_digest_of(&data));
        assert_eq!(payload, data);
    }

    #[tokio::test]
    async fn verdict_lines_parsed() {
        let mut input: &[u8] = b"File integrity verified.\n";
        let verdict = read_verdict(&mut input, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Verified);

        let mut input: &[u8] = b"File integrity not verified.\n";
        let verdict = read_verdict(&mut input, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::NotVerified);
    }

    #[tokio::test]
    async fn closed_without_verdict() {
        let mut input: &[u8] = b"";
        let err = read_verdict(&mut input, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NoResponse));
    }

    #[tokio::test]
    async fn garbage_response() {
        let mut input: &[u8] = b"OK\n";
        let err = read_verdict(&mut input, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::UnexpectedResponse(ref s) if s == "OK\n"));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // Keep the peer open but never write.
        let (mut client, _server) = duplex(64);
        let err = read_verdict(&mut client, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout(_)));
    }

    #[tokio::test]
    async fn invalid_digest_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"abc").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let err = send_file(addr, &path, "not-a-digest", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidDigest(_)));

        // No connection was attempted.
        let accepted =
            tokio::time::timeout(Duration::from_millis(50), listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = send_file(
            "127.0.0.1:9",
            &dir.path().join("missing"),
            "900150983cd24fb0d6963f7d28e17f72",
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }
}
