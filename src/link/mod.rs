//! Instrument connection layer.
//!
//! An [`InstrumentLink`] owns one physical or logical connection to one
//! instrument. It is responsible for framing only: delimiting one command and
//! one response on the wire. Semantic interpretation of the payload (ack
//! parsing, value extraction) belongs to the caller and lives in
//! [`protocol`].
//!
//! Two implementations exist:
//! - [`TcpLink`]: CRLF-delimited text over TCP, used by the laser control
//!   protocol.
//! - [`MockLink`]: scripted responses for tests, always available.

pub mod mock;
pub mod protocol;
pub mod tcp;

pub use mock::{MockLink, MockLinkLog, MockReply};
pub use tcp::TcpLink;

use crate::error::GatewayResult;
use async_trait::async_trait;

/// One connection to one instrument.
///
/// `send` writes a single command and returns the next framed response line.
/// Transport failures surface as `Io`, a silent instrument as `Timeout`.
/// `close` releases the transport unconditionally; it must succeed locally on
/// every exit path, including after I/O errors.
#[async_trait]
pub trait InstrumentLink: Send {
    /// Send one command and await its framed response.
    async fn send(&mut self, command: &str) -> GatewayResult<String>;

    /// Release the transport. Idempotent.
    async fn close(&mut self) -> GatewayResult<()>;
}

/// Where a link connects to. The mock target mirrors the hardware targets so
/// sessions can be exercised end-to-end without an instrument attached.
#[derive(Debug, Clone)]
pub enum LinkTarget {
    /// TCP control socket (host, port).
    Tcp {
        host: String,
        port: u16,
    },
    /// Scripted in-memory link for tests.
    Mock {
        replies: Vec<MockReply>,
        log: MockLinkLog,
    },
}

impl LinkTarget {
    /// Human-readable endpoint description for session records and logs.
    pub fn describe(&self) -> String {
        match self {
            LinkTarget::Tcp { host, port } => format!("tcp://{}:{}", host, port),
            LinkTarget::Mock { .. } => "mock://scripted".to_string(),
        }
    }
}

/// Open a link to the given target.
pub async fn open_link(
    target: &LinkTarget,
    timeout: std::time::Duration,
) -> GatewayResult<Box<dyn InstrumentLink>> {
    match target {
        LinkTarget::Tcp { host, port } => {
            let link = TcpLink::connect(host, *port, timeout).await?;
            Ok(Box::new(link))
        }
        LinkTarget::Mock { replies, log } => {
            Ok(Box::new(MockLink::new(replies.clone(), log.clone())))
        }
    }
}
