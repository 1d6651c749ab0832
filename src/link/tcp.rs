//! TCP transport for line-oriented instrument control.

use crate::error::{GatewayError, GatewayResult};
use crate::link::InstrumentLink;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

/// CRLF-framed text link over TCP.
///
/// Commands go out terminated by `\r\n`; one response is one line. The
/// response wait is bounded by `timeout`; the instrument going silent is a
/// `Timeout` error, not a hang.
pub struct TcpLink {
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
    peer: String,
    timeout: Duration,
}

impl TcpLink {
    /// Connect to an instrument control socket.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> GatewayResult<Self> {
        let peer = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&peer))
            .await
            .map_err(|_| GatewayError::Connection(format!("connect to {} timed out", peer)))?
            .map_err(|e| GatewayError::Connection(format!("connect to {} failed: {}", peer, e)))?;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: Some(BufReader::new(read_half)),
            writer: Some(write_half),
            peer,
            timeout,
        })
    }
}

#[async_trait]
impl InstrumentLink for TcpLink {
    async fn send(&mut self, command: &str) -> GatewayResult<String> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| GatewayError::Io("link is closed".to_string()))?;

        let framed = format!("{}\r\n", command);
        trace!(peer = %self.peer, command, "sending instrument command");
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await?;

        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| GatewayError::Io("link is closed".to_string()))?;

        let mut line = String::new();
        let n = tokio::time::timeout(self.timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| {
                GatewayError::Timeout(format!("no response from {} to '{}'", self.peer, command))
            })??;

        if n == 0 {
            return Err(GatewayError::Io(format!(
                "connection to {} closed by peer",
                self.peer
            )));
        }

        let response = line.trim_end_matches(['\r', '\n']).to_string();
        trace!(peer = %self.peer, response, "received instrument response");
        Ok(response)
    }

    async fn close(&mut self) -> GatewayResult<()> {
        // Dropping both halves releases the socket; shutdown failures are
        // irrelevant once we are tearing down.
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;
        Ok(())
    }
}
