//! Per-connection handler.
//!
//! Sends the handshake byte, then drives a [`Parser`] over successive read
//! chunks, echoing each transformed byte as soon as it is produced.

use crate::protocol::{Parser, HANDSHAKE};
use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Maximum bytes taken from the socket per read.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Errors that end a single connection.
#[derive(Debug)]
pub enum ConnectionError {
    Handshake(io::Error),
    Read(io::Error),
    Write(io::Error),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Handshake(e) => write!(f, "Error writing handshake to client: {e}"),
            ConnectionError::Read(e) => write!(f, "Error reading from client: {e}"),
            ConnectionError::Write(e) => write!(f, "Error writing to client: {e}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Handshake(e)
            | ConnectionError::Read(e)
            | ConnectionError::Write(e) => Some(e),
        }
    }
}

/// Handle a single client connection until the peer closes or I/O fails.
///
/// The stream is consumed and dropped (closed) on every return path.
/// A peer that disconnects mid-frame is a normal close.
pub async fn handle_connection<S>(mut stream: S) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_byte(&mut stream, HANDSHAKE)
        .await
        .map_err(ConnectionError::Handshake)?;

    let mut parser = Parser::new();
    let mut buffer = BytesMut::with_capacity(READ_CHUNK_SIZE);

    loop {
        buffer.clear();
        let n = stream
            .read_buf(&mut buffer)
            .await
            .map_err(ConnectionError::Read)?;
        if n == 0 {
            trace!(state = ?parser.state(), "Connection closed by client");
            return Ok(());
        }

        for &byte in &buffer[..n] {
            if let Some(out) = parser.feed_byte(byte) {
                write_byte(&mut stream, out)
                    .await
                    .map_err(ConnectionError::Write)?;
            }
        }
    }
}

async fn write_byte<S>(stream: &mut S, byte: u8) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&[byte]).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_handshake_then_echo() {
        let mock = Builder::new()
            .write(b"*")
            .read(b"^Ab$")
            .write(b"B")
            .write(b"c")
            .build();

        handle_connection(mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_bytes_outside_frame_are_dropped() {
        let mock = Builder::new()
            .write(b"*")
            .read(b"hello^world$bye")
            .write(b"xpsme")
            .build();

        handle_connection(mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mock = Builder::new()
            .write(b"*")
            .read(b"ab^")
            .read(b"H")
            .write(b"I")
            .read(b"i$^")
            .write(b"j")
            .read(&[0xFF])
            .write(&[0x00])
            .read(b"$zz")
            .build();

        handle_connection(mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_clean() {
        let mock = Builder::new()
            .write(b"*")
            .read(b"^ab")
            .write(b"bc")
            .build();

        assert!(handle_connection(mock).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_error_ends_connection() {
        let mock = Builder::new()
            .write(b"*")
            .read(b"^a")
            .write(b"b")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        match handle_connection(mock).await {
            Err(ConnectionError::Read(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_error_ends_connection() {
        let mock = Builder::new()
            .write(b"*")
            .read(b"^ab")
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();

        match handle_connection(mock).await {
            Err(ConnectionError::Write(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_failure() {
        let mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();

        assert!(matches!(
            handle_connection(mock).await,
            Err(ConnectionError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_large_input_is_chunked() {
        let mut input = vec![b'^'];
        input.extend(std::iter::repeat(b'a').take(3000));
        input.push(b'$');
        let expected = vec![b'b'; 3000];

        let mock = Builder::new()
            .write(b"*")
            .read(&input)
            .write(&expected)
            .build();

        handle_connection(mock).await.unwrap();
    }
}
