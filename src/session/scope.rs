//! Scope session actor.
//!
//! Configuration commands are serialized through the same bounded-queue
//! actor pattern as the laser session, so interleaved callers apply their
//! settings in a well-defined order (last write wins per setting). While the
//! capture loop runs, configuration commands are refused outright rather
//! than queued behind the stop.

use crate::acquisition::{
    AcqSettings, AcquisitionStreamer, CaptureDevice, ChannelConfig, FrameSubscription,
    TimebaseConfig, TriggerConfig,
};
use crate::config::SessionSettings;
use crate::error::{GatewayError, GatewayResult};
use crate::session::{InstrumentKind, SessionState};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
enum ScopeCommand {
    ConfigureChannel {
        config: ChannelConfig,
        response: oneshot::Sender<GatewayResult<()>>,
    },
    ConfigureTrigger {
        config: TriggerConfig,
        response: oneshot::Sender<GatewayResult<()>>,
    },
    ConfigureTimebase {
        config: TimebaseConfig,
        response: oneshot::Sender<GatewayResult<()>>,
    },
    StartLoop {
        response: oneshot::Sender<GatewayResult<()>>,
    },
    StopLoop {
        response: oneshot::Sender<GatewayResult<()>>,
    },
    ReadBack {
        response: oneshot::Sender<ScopeReadBack>,
    },
}

/// Current settings as held by the session, for read-back and tests.
#[derive(Debug, Clone)]
pub struct ScopeReadBack {
    pub channels: Vec<ChannelConfig>,
    pub trigger: Option<TriggerConfig>,
    pub timebase: Option<TimebaseConfig>,
}

/// The scope session: command queue handle plus the streamer for direct
/// frame subscription.
pub struct ScopeSession {
    id: Uuid,
    tx: mpsc::Sender<ScopeCommand>,
    streamer: Arc<AcquisitionStreamer>,
    last_status: Arc<Mutex<String>>,
}

impl ScopeSession {
    /// Spawn the session actor around a capture device. The scope needs no
    /// remote handshake; the session exists for the life of the process.
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        settings: &SessionSettings,
        frame_queue_depth: usize,
    ) -> Self {
        let id = Uuid::new_v4();
        let streamer = Arc::new(AcquisitionStreamer::new(device, frame_queue_depth));
        let last_status = Arc::new(Mutex::new("idle".to_string()));
        let (tx, rx) = mpsc::channel(settings.command_queue_depth);

        tokio::spawn(run_actor(
            ScopeActor {
                id,
                settings: AcqSettings::new(),
                streamer: Arc::clone(&streamer),
                last_status: Arc::clone(&last_status),
            },
            rx,
        ));

        info!(session = %id, kind = %InstrumentKind::Oscilloscope, "scope session opened");
        Self {
            id,
            tx,
            streamer,
            last_status,
        }
    }

    /// Session identity, for logs and diagnostics.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state: streaming or ready.
    pub fn state(&self) -> SessionState {
        if self.streamer.is_streaming() {
            SessionState::Streaming
        } else {
            SessionState::Ready
        }
    }

    /// Instrument personality behind this session.
    pub fn kind(&self) -> InstrumentKind {
        InstrumentKind::Oscilloscope
    }

    /// Short description of the last lifecycle event.
    pub fn last_status(&self) -> String {
        #[allow(clippy::unwrap_used)]
        self.last_status.lock().unwrap().clone()
    }

    /// Frames shed due to subscriber lag since the session opened.
    pub fn dropped_frames(&self) -> u64 {
        self.streamer.dropped_frames()
    }

    pub async fn configure_channel(&self, config: ChannelConfig) -> GatewayResult<()> {
        let (response, rx) = oneshot::channel();
        self.enqueue(ScopeCommand::ConfigureChannel { config, response })?;
        Self::await_reply(rx).await
    }

    pub async fn configure_trigger(&self, config: TriggerConfig) -> GatewayResult<()> {
        let (response, rx) = oneshot::channel();
        self.enqueue(ScopeCommand::ConfigureTrigger { config, response })?;
        Self::await_reply(rx).await
    }

    pub async fn configure_timebase(&self, config: TimebaseConfig) -> GatewayResult<()> {
        let (response, rx) = oneshot::channel();
        self.enqueue(ScopeCommand::ConfigureTimebase { config, response })?;
        Self::await_reply(rx).await
    }

    /// Start the capture loop from the current settings.
    pub async fn start_loop(&self) -> GatewayResult<()> {
        let (response, rx) = oneshot::channel();
        self.enqueue(ScopeCommand::StartLoop { response })?;
        Self::await_reply(rx).await
    }

    /// Stop the capture loop. Idempotent.
    pub async fn stop_loop(&self) -> GatewayResult<()> {
        let (response, rx) = oneshot::channel();
        self.enqueue(ScopeCommand::StopLoop { response })?;
        Self::await_reply(rx).await
    }

    /// Subscribe to the live frame sequence. Only valid while streaming.
    pub fn subscribe(&self) -> GatewayResult<FrameSubscription> {
        self.streamer.subscribe()
    }

    /// Snapshot of the current settings.
    pub async fn read_back(&self) -> GatewayResult<ScopeReadBack> {
        let (response, rx) = oneshot::channel();
        self.enqueue(ScopeCommand::ReadBack { response })?;
        rx.await
            .map_err(|_| GatewayError::SessionGone("scope session actor has stopped".to_string()))
    }

    fn enqueue(&self, command: ScopeCommand) -> GatewayResult<()> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(GatewayError::Rejected),
            Err(TrySendError::Closed(_)) => Err(GatewayError::SessionGone(
                "scope session actor has stopped".to_string(),
            )),
        }
    }

    async fn await_reply<T>(rx: oneshot::Receiver<GatewayResult<T>>) -> GatewayResult<T> {
        rx.await.map_err(|_| {
            GatewayError::SessionGone("scope session dropped the command".to_string())
        })?
    }
}

struct ScopeActor {
    id: Uuid,
    settings: AcqSettings,
    streamer: Arc<AcquisitionStreamer>,
    last_status: Arc<Mutex<String>>,
}

async fn run_actor(mut actor: ScopeActor, mut rx: mpsc::Receiver<ScopeCommand>) {
    while let Some(command) = rx.recv().await {
        actor.handle(command).await;
    }
    // Session handle dropped: wind the capture loop down with it.
    let _ = actor.streamer.stop_loop().await;
    debug!(session = %actor.id, "scope session actor stopped");
}

impl ScopeActor {
    fn set_status(&self, status: &str) {
        #[allow(clippy::unwrap_used)]
        {
            *self.last_status.lock().unwrap() = status.to_string();
        }
    }

    /// Configuration is frozen while the capture loop runs.
    fn reject_while_streaming(&self, operation: &str) -> GatewayResult<()> {
        if self.streamer.is_streaming() {
            return Err(GatewayError::InvalidState {
                state: SessionState::Streaming.to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    async fn handle(&mut self, command: ScopeCommand) {
        match command {
            ScopeCommand::ConfigureChannel { config, response } => {
                let result = self
                    .reject_while_streaming("configure_channel")
                    .and_then(|()| self.settings.set_channel(config));
                let _ = response.send(result);
            }
            ScopeCommand::ConfigureTrigger { config, response } => {
                let result = self
                    .reject_while_streaming("configure_trigger")
                    .and_then(|()| self.settings.set_trigger(config));
                let _ = response.send(result);
            }
            ScopeCommand::ConfigureTimebase { config, response } => {
                let result = self
                    .reject_while_streaming("configure_timebase")
                    .and_then(|()| self.settings.set_timebase(config));
                let _ = response.send(result);
            }
            ScopeCommand::StartLoop { response } => {
                let result = self
                    .settings
                    .snapshot()
                    .and_then(|snapshot| self.streamer.start_loop(snapshot));
                if result.is_ok() {
                    self.set_status("streaming");
                }
                let _ = response.send(result);
            }
            ScopeCommand::StopLoop { response } => {
                let result = self.streamer.stop_loop().await;
                self.set_status("idle");
                let _ = response.send(result);
            }
            ScopeCommand::ReadBack { response } => {
                let _ = response.send(ScopeReadBack {
                    channels: (0..=crate::acquisition::settings::MAX_CHANNEL)
                        .filter_map(|i| self.settings.channel(i).cloned())
                        .collect(),
                    trigger: self.settings.trigger().cloned(),
                    timebase: self.settings.timebase().cloned(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{Coupling, SimulatedScope};
    use std::time::Duration;

    fn session() -> ScopeSession {
        let device = Arc::new(SimulatedScope::new(Duration::from_millis(2)));
        ScopeSession::new(device, &SessionSettings::default(), 64)
    }

    fn channel(index: u8) -> ChannelConfig {
        ChannelConfig {
            channel: index,
            active: true,
            resolution_bits: 8,
            coupling: Coupling::Dc,
            voltage_scale: 1.0,
            analog_offset: 0.0,
        }
    }

    #[tokio::test]
    async fn configuration_reads_back() {
        let session = session();
        session.configure_channel(channel(0)).await.unwrap();
        session
            .configure_timebase(TimebaseConfig {
                index: 4,
                samples: 100,
                pre_trigger_samples: 10,
            })
            .await
            .unwrap();

        let read = session.read_back().await.unwrap();
        assert_eq!(read.channels.len(), 1);
        assert_eq!(read.timebase.unwrap().samples, 100);
        assert!(read.trigger.is_none());
    }

    #[tokio::test]
    async fn start_without_configuration_is_rejected() {
        let session = session();
        let err = session.start_loop().await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState { .. }));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn configure_is_refused_while_streaming() {
        let session = session();
        session.configure_channel(channel(0)).await.unwrap();
        session
            .configure_timebase(TimebaseConfig {
                index: 4,
                samples: 32,
                pre_trigger_samples: 0,
            })
            .await
            .unwrap();

        session.start_loop().await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);

        let err = session.configure_channel(channel(1)).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidState { .. }));

        session.stop_loop().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        // Once idle again, reconfiguration works.
        session.configure_channel(channel(1)).await.unwrap();
    }

    #[tokio::test]
    async fn streaming_delivers_frames() {
        let session = session();
        session.configure_channel(channel(0)).await.unwrap();
        session
            .configure_timebase(TimebaseConfig {
                index: 4,
                samples: 32,
                pre_trigger_samples: 0,
            })
            .await
            .unwrap();

        session.start_loop().await.unwrap();
        let mut sub = session.subscribe().unwrap();
        let frame = sub.next().await.unwrap();
        assert_eq!(frame.channel, 0);
        assert_eq!(frame.samples.len(), 32);
        assert_eq!(frame.sample_interval_ns, 16.0);

        session.stop_loop().await.unwrap();
    }
}
