//! Instrument sessions and their lifecycle.
//!
//! Each connected instrument gets one session actor task that owns the link
//! exclusively and processes commands strictly in arrival order. Callers talk
//! to the actor through a bounded mpsc channel with a oneshot reply embedded
//! in every command; a full queue rejects immediately instead of blocking.

pub mod laser;
pub mod scope;

use crate::config::SessionSettings;
use crate::error::{GatewayError, GatewayResult};
use crate::link::LinkTarget;
use self::laser::LaserSessionHandle;
use self::scope::ScopeSession;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Which instrument personality a session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Laser,
    Oscilloscope,
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKind::Laser => write!(f, "laser"),
            InstrumentKind::Oscilloscope => write!(f, "oscilloscope"),
        }
    }
}

/// Lifecycle state of one instrument session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Configuring,
    Streaming,
    Disconnecting,
    /// A fatal link error occurred; only disconnect is allowed.
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Ready => "Ready",
            SessionState::Configuring => "Configuring",
            SessionState::Streaming => "Streaming",
            SessionState::Disconnecting => "Disconnecting",
            SessionState::Faulted => "Faulted",
        };
        write!(f, "{}", name)
    }
}

/// Owner of the gateway's instrument sessions.
///
/// The laser slot is populated by `connect_laser` and survives until a new
/// connect replaces a dead session; the scope session is local and lives for
/// the whole process.
pub struct SessionManager {
    settings: SessionSettings,
    laser: RwLock<Option<LaserSessionHandle>>,
    scope: Arc<ScopeSession>,
}

impl SessionManager {
    pub fn new(settings: SessionSettings, scope: Arc<ScopeSession>) -> Self {
        Self {
            settings,
            laser: RwLock::new(None),
            scope,
        }
    }

    /// Open a laser session: connect the link, run the remote handshake, and
    /// spawn the session actor.
    ///
    /// Rejected with `InvalidState` when a live session already exists; a
    /// disconnected or faulted leftover is replaced.
    pub async fn connect_laser(&self, target: LinkTarget) -> GatewayResult<()> {
        let mut slot = self.laser.write().await;
        if let Some(existing) = slot.as_ref() {
            match existing.state() {
                SessionState::Disconnected | SessionState::Faulted => {}
                state => {
                    return Err(GatewayError::InvalidState {
                        state: state.to_string(),
                        operation: "connect".to_string(),
                    });
                }
            }
        }

        let handle = laser::connect(target, &self.settings).await?;
        info!(session = %handle.id(), endpoint = %handle.endpoint(), "laser session opened");
        *slot = Some(handle);
        Ok(())
    }

    /// The live laser session, or `SessionGone` if none was ever opened.
    pub async fn laser(&self) -> GatewayResult<LaserSessionHandle> {
        self.laser
            .read()
            .await
            .clone()
            .ok_or_else(|| GatewayError::SessionGone("no laser session".to_string()))
    }

    /// The scope session.
    pub fn scope(&self) -> Arc<ScopeSession> {
        Arc::clone(&self.scope)
    }

    /// Session poll defaults from configuration.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }
}
