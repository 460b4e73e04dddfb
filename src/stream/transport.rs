//! CRLF-framed transport over a TLS socket.
//!
//! The exchange terminates every JSON message with `\r\n`. [`FrameReader`]
//! splits the inbound byte stream on that terminator and [`FrameWriter`]
//! appends it to outbound frames. [`Transport`] is generic over the
//! underlying stream so the same code runs over TLS and in-memory pipes.

use rustls::pki_types::ServerName;
use tokio::io::{
    split, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::auth::ClientCertificate;
use crate::network::Endpoint;
use crate::stream::error::{StreamError, StreamResult};
use crate::stream::types::{op, ConnectionMessage};

/// Line terminator closing every frame
pub const FRAME_TERMINATOR: &[u8; 2] = b"\r\n";

/// Default read buffer; market images for busy events run to hundreds of KiB
pub const DEFAULT_FRAME_BUFFER_CAPACITY: usize = 1 << 20;

/// Transport over the production TLS socket
pub type TlsTransport = Transport<TlsStream<TcpStream>>;

// ============================================================================
// Frame reader / writer
// ============================================================================

/// Splits an inbound byte stream into `\r\n`-terminated frames
pub struct FrameReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(capacity, inner),
            pending: Vec::new(),
        }
    }

    /// Wait for the next complete frame, terminator stripped.
    ///
    /// A bare `\n` inside a frame is kept as data. Bytes left over when the
    /// peer closes are returned as a final frame; after that, and on a close
    /// with nothing but a stray `\r` buffered, this returns [`StreamError::ConnectionClosed`].
    ///
    /// Cancel safe: bytes read before a cancellation stay buffered for the
    /// next call.
    pub async fn read_frame(&mut self) -> StreamResult<Vec<u8>> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.pending).await?;

            if read == 0 {
                let mut frame = std::mem::take(&mut self.pending);
                if frame.last() == Some(&b'\r') {
                    frame.pop();
                }
                if frame.is_empty() {
                    return Err(StreamError::ConnectionClosed);
                }
                return Ok(frame);
            }

            if self.pending.ends_with(FRAME_TERMINATOR) {
                let mut frame = std::mem::take(&mut self.pending);
                frame.truncate(frame.len() - FRAME_TERMINATOR.len());
                if frame.is_empty() {
                    // keep-alive blank line
                    continue;
                }
                return Ok(frame);
            }
        }
    }
}

/// Writes frames followed by the `\r\n` terminator
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Send one frame; the terminator is appended here
    pub async fn write_frame(&mut self, frame: &[u8]) -> StreamResult<()> {
        let mut buf = Vec::with_capacity(frame.len() + FRAME_TERMINATOR.len());
        buf.extend_from_slice(frame);
        buf.extend_from_slice(FRAME_TERMINATOR);
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Close the write side of the socket
    pub async fn shutdown(&mut self) -> StreamResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

// ============================================================================
// Transport
// ============================================================================

/// A connected, handshaken stream socket
pub struct Transport<S> {
    connection_id: String,
    reader: FrameReader<ReadHalf<S>>,
    writer: Option<FrameWriter<WriteHalf<S>>>,
}

impl Transport<TlsStream<TcpStream>> {
    /// Dial `endpoint` with mutual TLS and consume the connection frame
    pub async fn connect(
        endpoint: Endpoint,
        certificate: &ClientCertificate,
        frame_capacity: usize,
    ) -> StreamResult<Self> {
        let connector = TlsConnector::from(certificate.tls_config()?);
        let server_name = ServerName::try_from(endpoint.host().to_string())
            .map_err(|e| StreamError::Tls(format!("Invalid server name {}: {}", endpoint.host(), e)))?;

        tracing::debug!("Dialing stream endpoint {}", endpoint);
        let tcp = TcpStream::connect(endpoint.address())
            .await
            .map_err(|e| StreamError::ConnectionFailed(format!("{}: {}", endpoint, e)))?;
        tcp.set_nodelay(true)?;

        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| StreamError::Tls(e.to_string()))?;

        Self::handshake(tls, frame_capacity).await
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read exactly one frame from a freshly opened stream and require it to
    /// be a connection message with a non-empty id
    pub async fn handshake(stream: S, frame_capacity: usize) -> StreamResult<Self> {
        let (read_half, write_half) = split(stream);
        let mut reader = FrameReader::new(read_half, frame_capacity);

        let frame = reader
            .read_frame()
            .await
            .map_err(|e| StreamError::ConnectionFailed(format!("No connection frame: {}", e)))?;
        let message: ConnectionMessage = serde_json::from_slice(&frame).map_err(|e| {
            StreamError::ConnectionFailed(format!("Invalid connection frame: {}", e))
        })?;

        if message.op != op::CONNECTION {
            tracing::warn!("Handshake frame has op '{}', expected '{}'", message.op, op::CONNECTION);
        }
        if message.connection_id.is_empty() {
            return Err(StreamError::ConnectionFailed(
                "Connection frame carried an empty connection id".to_string(),
            ));
        }

        tracing::debug!("Stream connected: {}", message.connection_id);
        Ok(Self {
            connection_id: message.connection_id,
            reader,
            writer: Some(FrameWriter::new(write_half)),
        })
    }

    /// Connection id assigned by the exchange
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Send one frame
    pub async fn write(&mut self, frame: &[u8]) -> StreamResult<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_frame(frame).await,
            None => Err(StreamError::NoConnection),
        }
    }

    /// Wait for the next frame
    pub async fn read_frame(&mut self) -> StreamResult<Vec<u8>> {
        if self.writer.is_none() {
            return Err(StreamError::NoConnection);
        }
        self.reader.read_frame().await
    }

    /// Shut down the write half of the socket; later reads and writes through
    /// this transport fail with `NoConnection`. The read half is released
    /// when the transport is dropped.
    pub async fn stop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Error closing stream socket: {}", e);
            }
        }
    }

    /// Hand the two socket halves to separate tasks
    pub fn into_split(self) -> StreamResult<(FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>)> {
        let writer = self.writer.ok_or(StreamError::NoConnection)?;
        Ok((self.reader, writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const CONNECTION_FRAME: &[u8] = b"{\"op\":\"connection\",\"connectionId\":\"002-230915140112-174\"}\r\n";

    #[tokio::test]
    async fn test_frames_split_on_crlf() {
        let (client, mut server) = duplex(64);
        let mut reader = FrameReader::new(client, 8);

        server.write_all(b"{\"a\":1}\r\n{\"b\"").await.unwrap();
        server.write_all(b":2}\r\n").await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), b"{\"a\":1}");
        assert_eq!(reader.read_frame().await.unwrap(), b"{\"b\":2}");
    }

    #[tokio::test]
    async fn test_bare_newline_is_data() {
        let (client, mut server) = duplex(64);
        let mut reader = FrameReader::new(client, 64);

        server.write_all(b"line one\nline two\r\n").await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), b"line one\nline two");
    }

    #[tokio::test]
    async fn test_partial_frame_at_eof() {
        let (client, mut server) = duplex(64);
        let mut reader = FrameReader::new(client, 64);

        server.write_all(b"{\"a\":1}\r\n{\"tail\":true}\r").await.unwrap();
        drop(server);

        assert_eq!(reader.read_frame().await.unwrap(), b"{\"a\":1}");
        assert_eq!(reader.read_frame().await.unwrap(), b"{\"tail\":true}");
        assert!(matches!(
            reader.read_frame().await,
            Err(StreamError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_frame_larger_than_buffer() {
        let (client, mut server) = duplex(1 << 16);
        let mut reader = FrameReader::new(client, 16);

        let payload = "x".repeat(10_000);
        let writer = tokio::spawn(async move {
            server.write_all(payload.as_bytes()).await.unwrap();
            server.write_all(b"\r\n").await.unwrap();
            server
        });

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.len(), 10_000);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_keep_alive_frames_skipped() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\r\n{\"a\":")
            .read(b"1}\r\n\r\n")
            .build();
        let mut reader = FrameReader::new(mock, 64);

        assert_eq!(reader.read_frame().await.unwrap(), b"{\"a\":1}");
        assert!(matches!(
            reader.read_frame().await,
            Err(StreamError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_lone_carriage_return_at_eof_is_close() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"a\":1}\r\n\r")
            .build();
        let mut reader = FrameReader::new(mock, 64);

        assert_eq!(reader.read_frame().await.unwrap(), b"{\"a\":1}");
        assert!(matches!(
            reader.read_frame().await,
            Err(StreamError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_sends_exact_bytes() {
        let mock = tokio_test::io::Builder::new()
            .write(b"{\"op\":\"authentication\"}\r\n")
            .build();
        let mut writer = FrameWriter::new(mock);
        writer.write_frame(b"{\"op\":\"authentication\"}").await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_appends_terminator() {
        let (client, mut server) = duplex(64);
        let mut writer = FrameWriter::new(client);

        writer.write_frame(b"{\"op\":\"status\"}").await.unwrap();
        let mut buf = vec![0u8; 17];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, b"{\"op\":\"status\"}\r\n");
    }

    #[tokio::test]
    async fn test_handshake_reads_connection_id() {
        let (client, mut server) = duplex(1024);
        server.write_all(CONNECTION_FRAME).await.unwrap();

        let transport = Transport::handshake(client, 1024).await.unwrap();
        assert_eq!(transport.connection_id(), "002-230915140112-174");
    }

    #[tokio::test]
    async fn test_handshake_rejects_empty_connection_id() {
        let (client, mut server) = duplex(1024);
        server
            .write_all(b"{\"op\":\"connection\",\"connectionId\":\"\"}\r\n")
            .await
            .unwrap();

        let result = Transport::handshake(client, 1024).await;
        assert!(matches!(result, Err(StreamError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_handshake_rejects_garbage_and_closed_socket() {
        let (client, mut server) = duplex(1024);
        server.write_all(b"not json\r\n").await.unwrap();
        let result = Transport::handshake(client, 1024).await;
        assert!(matches!(result, Err(StreamError::ConnectionFailed(_))));

        let (client, server) = duplex(1024);
        drop(server);
        let result = Transport::handshake(client, 1024).await;
        assert!(matches!(result, Err(StreamError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_write_after_stop_fails() {
        let (client, mut server) = duplex(1024);
        server.write_all(CONNECTION_FRAME).await.unwrap();

        let mut transport = Transport::handshake(client, 1024).await.unwrap();
        transport.write(b"{}").await.unwrap();
        transport.stop().await;

        assert!(matches!(
            transport.write(b"{}").await,
            Err(StreamError::NoConnection)
        ));
        assert!(matches!(
            transport.read_frame().await,
            Err(StreamError::NoConnection)
        ));
        assert!(matches!(transport.into_split(), Err(StreamError::NoConnection)));
    }
}
