//! Scripted in-memory link for tests.

use crate::error::{GatewayError, GatewayResult};
use crate::link::InstrumentLink;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One scripted reply from the mock instrument.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Respond with this line.
    Line(String),
    /// Fail the send with an I/O error.
    IoError(String),
    /// Fail the send with a timeout.
    Timeout,
}

impl MockReply {
    /// Convenience constructor for a text reply.
    pub fn line(s: impl Into<String>) -> Self {
        MockReply::Line(s.into())
    }
}

/// Shared view of what the mock link observed, for test assertions.
#[derive(Debug, Clone, Default)]
pub struct MockLinkLog {
    inner: Arc<Mutex<MockLogInner>>,
}

#[derive(Debug, Default)]
struct MockLogInner {
    sent: Vec<String>,
    closed: bool,
}

impl MockLinkLog {
    /// Commands sent over the link, in order.
    pub fn sent(&self) -> Vec<String> {
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap().sent.clone()
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap().closed
    }

    fn record_send(&self, command: &str) {
        #[allow(clippy::unwrap_used)]
        self.inner.lock().unwrap().sent.push(command.to_string());
    }

    fn record_close(&self) {
        #[allow(clippy::unwrap_used)]
        {
            self.inner.lock().unwrap().closed = true;
        }
    }
}

/// An [`InstrumentLink`] that answers from a scripted reply queue. Running
/// out of script is an I/O error, which keeps tests honest about how many
/// commands they expect.
pub struct MockLink {
    replies: VecDeque<MockReply>,
    log: MockLinkLog,
}

impl MockLink {
    /// Create a link that will serve `replies` in order.
    pub fn new(replies: Vec<MockReply>, log: MockLinkLog) -> Self {
        Self {
            replies: replies.into(),
            log,
        }
    }
}

#[async_trait]
impl InstrumentLink for MockLink {
    async fn send(&mut self, command: &str) -> GatewayResult<String> {
        self.log.record_send(command);
        match self.replies.pop_front() {
            Some(MockReply::Line(line)) => Ok(line),
            Some(MockReply::IoError(msg)) => Err(GatewayError::Io(msg)),
            Some(MockReply::Timeout) => {
                Err(GatewayError::Timeout(format!("no scripted reply to '{}'", command)))
            }
            None => Err(GatewayError::Io("mock reply script exhausted".to_string())),
        }
    }

    async fn close(&mut self) -> GatewayResult<()> {
        self.log.record_close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_replies_in_order_and_records_commands() {
        let log = MockLinkLog::default();
        let mut link = MockLink::new(
            vec![MockReply::line("OK: first"), MockReply::line("OK: second")],
            log.clone(),
        );

        assert_eq!(link.send("A").await.unwrap(), "OK: first");
        assert_eq!(link.send("B").await.unwrap(), "OK: second");
        assert!(link.send("C").await.is_err());
        assert_eq!(log.sent(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn close_is_recorded() {
        let log = MockLinkLog::default();
        let mut link = MockLink::new(vec![], log.clone());
        link.close().await.unwrap();
        assert!(log.is_closed());
    }
}
