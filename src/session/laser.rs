//! Laser session actor.
//!
//! The actor owns the instrument link exclusively and processes commands one
//! at a time in arrival order, so two concurrent callers can never interleave
//! their request/response pairs on the wire. The handle side is cheap to
//! clone and enqueues commands without blocking: a full queue means the
//! caller is told `Rejected` immediately.
//!
//! Disconnect is special on two counts: it is delivered even when the queue
//! is full, and it flips a cancellation signal first so an in-flight
//! convergence wait aborts instead of riding out its poll budget.

use crate::config::SessionSettings;
use crate::convergence::{self, Convergence, ConvergenceState, Step};
use crate::error::{GatewayError, GatewayResult};
use crate::link::{open_link, protocol, InstrumentLink, LinkTarget};
use crate::session::{InstrumentKind, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Commands processed by the laser session actor. Each variant carries its
/// reply channel.
#[derive(Debug)]
enum LaserCommand {
    SetScalar {
        name: String,
        value: f64,
        response: oneshot::Sender<GatewayResult<String>>,
    },
    Status {
        response: oneshot::Sender<GatewayResult<String>>,
    },
    IsReady {
        response: oneshot::Sender<GatewayResult<bool>>,
    },
    AwaitReady {
        poll_interval: Duration,
        max_misses: u32,
        response: oneshot::Sender<GatewayResult<Convergence>>,
    },
    Disconnect {
        response: oneshot::Sender<GatewayResult<()>>,
    },
}

#[derive(Debug)]
struct HandleInner {
    id: Uuid,
    endpoint: String,
    tx: mpsc::Sender<LaserCommand>,
    cancel: watch::Sender<bool>,
    state: watch::Receiver<SessionState>,
    last_status: watch::Receiver<String>,
}

/// Caller-side handle to a laser session actor.
#[derive(Clone, Debug)]
pub struct LaserSessionHandle {
    inner: Arc<HandleInner>,
}

impl LaserSessionHandle {
    /// Session identity, for logs and diagnostics.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Endpoint the session connected to.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Current lifecycle state as last published by the actor.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Instrument personality behind this session.
    pub fn kind(&self) -> InstrumentKind {
        InstrumentKind::Laser
    }

    /// Last status line received from the instrument.
    pub fn last_status(&self) -> String {
        self.inner.last_status.borrow().clone()
    }

    /// Set a named scalar parameter. The reply carries the acknowledged
    /// value rendered the way the instrument echoed it.
    pub async fn set_scalar(&self, name: &str, value: f64) -> GatewayResult<String> {
        let (response, rx) = oneshot::channel();
        self.enqueue(LaserCommand::SetScalar {
            name: name.to_string(),
            value,
            response,
        })?;
        self.await_reply(rx).await
    }

    /// Raw status line from the instrument.
    pub async fn status(&self) -> GatewayResult<String> {
        let (response, rx) = oneshot::channel();
        self.enqueue(LaserCommand::Status { response })?;
        self.await_reply(rx).await
    }

    /// Single readiness probe: one status query fed into the session's
    /// running convergence state. No waiting, no retries.
    pub async fn is_ready(&self) -> GatewayResult<bool> {
        let (response, rx) = oneshot::channel();
        self.enqueue(LaserCommand::IsReady { response })?;
        self.await_reply(rx).await
    }

    /// Block until the resonator reading stabilises or the miss budget runs
    /// out.
    pub async fn await_ready(
        &self,
        poll_interval: Duration,
        max_misses: u32,
    ) -> GatewayResult<Convergence> {
        let (response, rx) = oneshot::channel();
        self.enqueue(LaserCommand::AwaitReady {
            poll_interval,
            max_misses,
            response,
        })?;
        self.await_reply(rx).await
    }

    /// Tear down the session. Always succeeds locally: a dead actor or a
    /// refused goodbye still leaves the session disconnected on our side.
    pub async fn disconnect(&self) -> GatewayResult<()> {
        // Abort any in-flight convergence wait so the queued disconnect is
        // reached promptly.
        let _ = self.inner.cancel.send(true);

        let (response, rx) = oneshot::channel();
        if self
            .inner
            .tx
            .send(LaserCommand::Disconnect { response })
            .await
            .is_err()
        {
            return Ok(());
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }

    fn enqueue(&self, command: LaserCommand) -> GatewayResult<()> {
        match self.inner.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(GatewayError::Rejected),
            Err(TrySendError::Closed(_)) => Err(self.gone_error()),
        }
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<GatewayResult<T>>) -> GatewayResult<T> {
        rx.await.map_err(|_| self.gone_error())?
    }

    /// A command reached a stopped actor. A clean disconnect is an
    /// `InvalidState`; anything else means the session vanished under us.
    fn gone_error(&self) -> GatewayError {
        match self.state() {
            SessionState::Disconnected => GatewayError::InvalidState {
                state: SessionState::Disconnected.to_string(),
                operation: "command".to_string(),
            },
            _ => GatewayError::SessionGone("laser session actor has stopped".to_string()),
        }
    }
}

/// Connect to the laser, perform the remote handshake, and spawn the session
/// actor.
pub(crate) async fn connect(
    target: LinkTarget,
    settings: &SessionSettings,
) -> GatewayResult<LaserSessionHandle> {
    let endpoint = target.describe();
    let mut link = open_link(&target, settings.response_timeout).await?;

    match link.send(protocol::CMD_CONNECT).await {
        Ok(line) if protocol::is_ack_ok(&line) => {}
        Ok(line) => {
            let _ = link.close().await;
            return Err(GatewayError::Connection(format!(
                "remote handshake refused: {}",
                line
            )));
        }
        Err(e) => {
            let _ = link.close().await;
            return Err(e);
        }
    }

    let (tx, rx) = mpsc::channel(settings.command_queue_depth);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(SessionState::Ready);
    let (status_tx, status_rx) = watch::channel("connected".to_string());
    let id = Uuid::new_v4();

    tokio::spawn(run_actor(
        LaserActor {
            id,
            link,
            state: state_tx,
            last_status: status_tx,
            cancel: cancel_rx,
            probe: ConvergenceState::new(),
        },
        rx,
    ));

    Ok(LaserSessionHandle {
        inner: Arc::new(HandleInner {
            id,
            endpoint,
            tx,
            cancel: cancel_tx,
            state: state_rx,
            last_status: status_rx,
        }),
    })
}

struct LaserActor {
    id: Uuid,
    link: Box<dyn InstrumentLink>,
    state: watch::Sender<SessionState>,
    last_status: watch::Sender<String>,
    cancel: watch::Receiver<bool>,
    probe: ConvergenceState,
}

async fn run_actor(mut actor: LaserActor, mut rx: mpsc::Receiver<LaserCommand>) {
    while let Some(command) = rx.recv().await {
        if actor.handle(command).await {
            break;
        }
    }
    debug!(session = %actor.id, "laser session actor stopped");
}

impl LaserActor {
    fn set_state(&self, state: SessionState) {
        let _ = self.state.send(state);
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Guard for everything except disconnect.
    fn require_ready(&self, operation: &str) -> GatewayResult<()> {
        match self.current_state() {
            SessionState::Ready => Ok(()),
            state => Err(GatewayError::InvalidState {
                state: state.to_string(),
                operation: operation.to_string(),
            }),
        }
    }

    /// Drive the link and demote the session to `Faulted` on fatal errors.
    async fn send_checked(&mut self, command: &str) -> GatewayResult<String> {
        match self.link.send(command).await {
            Ok(line) => {
                let _ = self.last_status.send(line.clone());
                Ok(line)
            }
            Err(e) => {
                if e.is_fatal() {
                    warn!(session = %self.id, error = %e, "fatal link error, session faulted");
                    self.set_state(SessionState::Faulted);
                    let _ = self.link.close().await;
                }
                Err(e)
            }
        }
    }

    /// Process one command. Returns true when the actor should stop.
    async fn handle(&mut self, command: LaserCommand) -> bool {
        match command {
            LaserCommand::SetScalar {
                name,
                value,
                response,
            } => {
                let result = self.set_scalar(&name, value).await;
                let _ = response.send(result);
                false
            }
            LaserCommand::Status { response } => {
                let result = match self.require_ready("status") {
                    Ok(()) => self.send_checked(protocol::CMD_STATUS).await,
                    Err(e) => Err(e),
                };
                let _ = response.send(result);
                false
            }
            LaserCommand::IsReady { response } => {
                let result = self.is_ready().await;
                let _ = response.send(result);
                false
            }
            LaserCommand::AwaitReady {
                poll_interval,
                max_misses,
                response,
            } => {
                let result = self.await_ready(poll_interval, max_misses).await;
                let _ = response.send(result);
                false
            }
            LaserCommand::Disconnect { response } => {
                self.disconnect().await;
                let _ = response.send(Ok(()));
                true
            }
        }
    }

    async fn set_scalar(&mut self, name: &str, value: f64) -> GatewayResult<String> {
        self.require_ready("set_scalar")?;

        if !value.is_finite() {
            return Err(GatewayError::RejectedParameter(format!(
                "non-finite value for {}",
                name
            )));
        }

        let Some(wire_command) = protocol::set_parameter_command(name, value) else {
            return Err(GatewayError::RejectedParameter(format!(
                "unknown parameter '{}'",
                name
            )));
        };

        self.set_state(SessionState::Configuring);
        let result = self.send_checked(&wire_command).await;
        if self.current_state() == SessionState::Configuring {
            self.set_state(SessionState::Ready);
        }
        let ack = result?;

        if !protocol::is_ack_ok(&ack) {
            return Err(GatewayError::RejectedParameter(format!(
                "instrument refused {}: {}",
                name, ack
            )));
        }

        // The ack echoes the applied value in some scientific-notation
        // spelling; normalise it and verify it is the value we asked for.
        match protocol::parse_engineering(&ack) {
            Some(echoed) if (echoed - value).abs() <= value.abs().max(1.0) * 1e-6 => Ok(format!(
                "{} set to {}",
                name,
                protocol::format_engineering(echoed)
            )),
            Some(echoed) => Err(GatewayError::RejectedParameter(format!(
                "instrument applied {} instead of {}",
                protocol::format_engineering(echoed),
                protocol::format_engineering(value)
            ))),
            None => Err(GatewayError::RejectedParameter(format!(
                "acknowledgement carried no value echo: {}",
                ack
            ))),
        }
    }

    async fn is_ready(&mut self) -> GatewayResult<bool> {
        self.require_ready("is_ready")?;
        let line = self.send_checked(protocol::CMD_STATUS).await?;
        let reading = protocol::extract_resonator(&line);
        Ok(matches!(self.probe.observe(reading), Step::Converged(_)))
    }

    async fn await_ready(
        &mut self,
        poll_interval: Duration,
        max_misses: u32,
    ) -> GatewayResult<Convergence> {
        self.require_ready("await_ready")?;
        self.set_state(SessionState::Configuring);

        let mut cancel = self.cancel.clone();
        let result = convergence::wait_for_stable(
            self.link.as_mut(),
            protocol::CMD_STATUS,
            poll_interval,
            max_misses,
            &mut cancel,
        )
        .await;

        match &result {
            Err(e) if e.is_fatal() => {
                warn!(session = %self.id, error = %e, "fatal link error, session faulted");
                self.set_state(SessionState::Faulted);
                let _ = self.link.close().await;
            }
            _ => {
                if self.current_state() == SessionState::Configuring {
                    self.set_state(SessionState::Ready);
                }
            }
        }
        result
    }

    async fn disconnect(&mut self) {
        self.set_state(SessionState::Disconnecting);
        // The goodbye is best effort; the local teardown happens regardless.
        if let Err(e) = self.link.send(protocol::CMD_DISCONNECT).await {
            debug!(session = %self.id, error = %e, "goodbye not acknowledged");
        }
        let _ = self.link.close().await;
        self.set_state(SessionState::Disconnected);
        let _ = self.last_status.send("disconnected".to_string());
        info!(session = %self.id, kind = %InstrumentKind::Laser, "laser session closed");
    }
}
