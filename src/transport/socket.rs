//! Stream socket transport (tcp or unix)
//!
//! Frames are newline-delimited JSON over the stream, encoded and decoded by
//! `tokio-util`'s `LinesCodec`. Dialing is bounded by a 10 second timeout;
//! close severs the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::debug;

use super::Transport;
use crate::protocol::JsonRpcMessage;
use crate::{Error, Result};

/// Connect timeout for dialing
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type BoxedReader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, LinesCodec>;
type BoxedWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LinesCodec>;

/// Stream socket transport for tcp and unix endpoints
pub struct SocketTransport {
    reader: Mutex<BoxedReader>,
    writer: Mutex<BoxedWriter>,
    connected: AtomicBool,
    endpoint: String,
}

impl SocketTransport {
    /// Dial a TCP endpoint with the connect timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the dial fails or times out.
    pub async fn connect_tcp(address: &str) -> Result<Arc<Self>> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| Error::Transport(format!("Connect to {address} timed out")))?
            .map_err(|e| Error::Transport(format!("Connect to {address} failed: {e}")))?;
        debug!(address = %address, "Connected tcp peer");
        Ok(Self::from_stream(stream, address.to_string()))
    }

    /// Dial a unix socket with the connect timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the dial fails or times out.
    #[cfg(unix)]
    pub async fn connect_unix(path: &str) -> Result<Arc<Self>> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::UnixStream::connect(path))
            .await
            .map_err(|_| Error::Transport(format!("Connect to {path} timed out")))?
            .map_err(|e| Error::Transport(format!("Connect to {path} failed: {e}")))?;
        debug!(path = %path, "Connected unix peer");
        Ok(Self::from_stream(stream, path.to_string()))
    }

    /// Wrap an already-connected stream (also used by tests).
    pub fn from_stream<S>(stream: S, endpoint: String) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Arc::new(Self {
            reader: Mutex::new(FramedRead::new(
                Box::new(read_half) as Box<dyn AsyncRead + Send + Unpin>,
                LinesCodec::new(),
            )),
            writer: Mutex::new(FramedWrite::new(
                Box::new(write_half) as Box<dyn AsyncWrite + Send + Unpin>,
                LinesCodec::new(),
            )),
            connected: AtomicBool::new(true),
            endpoint,
        })
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn send(&self, message: &JsonRpcMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport("Not connected".to_string()));
        }
        let line = serde_json::to_string(message)?;
        self.writer
            .lock()
            .await
            .send(line)
            .await
            .map_err(|e| Error::Transport(format!("Write to {} failed: {e}", self.endpoint)))
    }

    async fn receive(&self) -> Result<JsonRpcMessage> {
        let mut reader = self.reader.lock().await;
        match reader.next().await {
            Some(Ok(line)) => Ok(serde_json::from_str(&line)?),
            Some(Err(e)) => {
                self.connected.store(false, Ordering::Relaxed);
                Err(Error::Transport(format!("Read failed: {e}")))
            }
            None => {
                self.connected.store(false, Ordering::Relaxed);
                Err(Error::Transport(format!(
                    "Connection to {} closed",
                    self.endpoint
                )))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        SinkExt::<String>::close(&mut *self.writer.lock().await)
            .await
            .map_err(|e| Error::Transport(format!("Close failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonRpcNotification, JsonRpcRequest, RequestId};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_round_trip_with_echo_server() {
        // GIVEN: a TCP server that echoes lines
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                write_half.write_all(line.as_bytes()).await.unwrap();
                write_half.write_all(b"\n").await.unwrap();
            }
        });

        // WHEN: a frame goes out and comes back
        let transport = SocketTransport::connect_tcp(&address).await.unwrap();
        let frame = JsonRpcMessage::Request(JsonRpcRequest::new(
            RequestId::Number(5),
            "resources/list",
            None,
        ));
        transport.send(&frame).await.unwrap();
        let echoed = transport.receive().await.unwrap();

        // THEN: the frame round-trips
        assert_eq!(echoed.method(), Some("resources/list"));
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn server_disconnect_flips_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let transport = SocketTransport::connect_tcp(&address).await.unwrap();
        let err = transport.receive().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn dial_failure_is_an_error() {
        // Port 1 on localhost is essentially never listening
        let result = SocketTransport::connect_tcp("127.0.0.1:1").await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                write_half.write_all(line.as_bytes()).await.unwrap();
                write_half.write_all(b"\n").await.unwrap();
            }
        });

        let transport = SocketTransport::connect_unix(&path.to_string_lossy())
            .await
            .unwrap();
        let frame =
            JsonRpcMessage::Notification(JsonRpcNotification::new("notifications/initialized", None));
        transport.send(&frame).await.unwrap();
        let echoed = transport.receive().await.unwrap();
        assert!(echoed.is_notification());
    }
}
