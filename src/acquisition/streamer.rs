//! Continuous capture loop with fan-out to gRPC subscribers.
//!
//! One background task drives the capture device; decoded frames go out on a
//! bounded broadcast channel. Every subscriber sees every frame in capture
//! order unless it falls behind, in which case the channel sheds its oldest
//! frames for that subscriber and the loss is counted. The producer never
//! blocks on a slow consumer.

use crate::acquisition::device::CaptureDevice;
use crate::acquisition::settings::AcqSnapshot;
use crate::error::{GatewayError, GatewayResult};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One decoded trace for one channel and series, with enough acquisition
/// metadata to interpret the samples without out-of-band context.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub channel: u8,
    pub series: u32,
    pub sample_interval_ns: f64,
    pub resolution_bits: u32,
    pub voltage_scale: f64,
    pub analog_offset: f64,
    pub capture_count: u64,
    pub accumulation: String,
    pub captured_at: DateTime<Utc>,
    pub samples: Vec<f64>,
    pub times: Vec<f64>,
}

enum LoopState {
    Idle,
    Streaming {
        stop: watch::Sender<bool>,
        frames: broadcast::Sender<Arc<TraceFrame>>,
        task: JoinHandle<()>,
    },
}

/// Owns the capture loop lifecycle for one scope session.
pub struct AcquisitionStreamer {
    device: Arc<dyn CaptureDevice>,
    frame_queue_depth: usize,
    state: Mutex<LoopState>,
    dropped: Arc<AtomicU64>,
}

impl AcquisitionStreamer {
    pub fn new(device: Arc<dyn CaptureDevice>, frame_queue_depth: usize) -> Self {
        Self {
            device,
            frame_queue_depth: frame_queue_depth.max(1),
            state: Mutex::new(LoopState::Idle),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the capture loop is currently running.
    pub fn is_streaming(&self) -> bool {
        #[allow(clippy::unwrap_used)]
        let state = self.state.lock().unwrap();
        matches!(*state, LoopState::Streaming { .. })
    }

    /// Frames shed across all subscribers since this streamer was created.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Start the capture loop against a settings snapshot.
    ///
    /// The snapshot is taken before this call; configuration is frozen for
    /// the lifetime of the loop. Fails with `InvalidState` if a loop is
    /// already running.
    pub fn start_loop(&self, snapshot: AcqSnapshot) -> GatewayResult<()> {
        #[allow(clippy::unwrap_used)]
        let mut state = self.state.lock().unwrap();
        if matches!(*state, LoopState::Streaming { .. }) {
            return Err(GatewayError::InvalidState {
                state: "Streaming".to_string(),
                operation: "start_loop".to_string(),
            });
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (frames_tx, _) = broadcast::channel(self.frame_queue_depth);
        let task = tokio::spawn(capture_loop(
            Arc::clone(&self.device),
            snapshot,
            frames_tx.clone(),
            stop_rx,
        ));

        debug!("capture loop started");
        *state = LoopState::Streaming {
            stop: stop_tx,
            frames: frames_tx,
            task,
        };
        Ok(())
    }

    /// Stop the capture loop and wait for it to wind down. Frames already
    /// decoded and published stay deliverable to subscribers; a capture in
    /// flight is dropped. Idempotent when already idle.
    pub async fn stop_loop(&self) -> GatewayResult<()> {
        let previous = {
            #[allow(clippy::unwrap_used)]
            let mut state = self.state.lock().unwrap();
            std::mem::replace(&mut *state, LoopState::Idle)
        };

        if let LoopState::Streaming { stop, frames, task } = previous {
            let _ = stop.send(true);
            // Dropping our sender clone lets subscriber streams end once the
            // loop task's clone goes away too.
            drop(frames);
            if task.await.is_err() {
                warn!("capture loop task panicked during shutdown");
            }
            debug!("capture loop stopped");
        }
        Ok(())
    }

    /// Subscribe to the live frame sequence. Only valid while streaming; the
    /// returned stream ends cleanly when the loop stops.
    pub fn subscribe(&self) -> GatewayResult<FrameSubscription> {
        #[allow(clippy::unwrap_used)]
        let state = self.state.lock().unwrap();
        match &*state {
            LoopState::Streaming { frames, .. } => Ok(FrameSubscription {
                rx: frames.subscribe(),
                dropped: Arc::clone(&self.dropped),
            }),
            LoopState::Idle => Err(GatewayError::InvalidState {
                state: "Idle".to_string(),
                operation: "subscribe".to_string(),
            }),
        }
    }
}

/// One subscriber's view of the frame sequence.
#[derive(Debug)]
pub struct FrameSubscription {
    rx: broadcast::Receiver<Arc<TraceFrame>>,
    dropped: Arc<AtomicU64>,
}

impl FrameSubscription {
    /// Next frame, or `None` once the capture loop has stopped and the
    /// backlog is drained. Lag is absorbed here: shed frames are counted and
    /// delivery resumes at the oldest retained frame.
    pub async fn next(&mut self) -> Option<Arc<TraceFrame>> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped.fetch_add(n, Ordering::Relaxed);
                    warn!(shed = n, "subscriber lagged, oldest frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

async fn capture_loop(
    device: Arc<dyn CaptureDevice>,
    snapshot: AcqSnapshot,
    frames: broadcast::Sender<Arc<TraceFrame>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut capture_count: u64 = 0;

    loop {
        if *stop.borrow() {
            break;
        }

        let block = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            result = device.run_block(&snapshot) => match result {
                Ok(block) => block,
                Err(e) => {
                    warn!(error = %e, "block capture failed, retrying");
                    continue;
                }
            },
        };

        capture_count += 1;
        let captured_at = Utc::now();
        for capture in block.channels {
            let Some(config) = snapshot
                .channels
                .iter()
                .find(|c| c.channel == capture.channel)
            else {
                continue;
            };
            for (series_idx, samples) in capture.series.into_iter().enumerate() {
                let times = (0..samples.len())
                    .map(|i| i as f64 * snapshot.sample_interval_ns * 1e-9)
                    .collect();
                let frame = TraceFrame {
                    channel: capture.channel,
                    series: series_idx as u32,
                    sample_interval_ns: snapshot.sample_interval_ns,
                    resolution_bits: config.resolution_bits,
                    voltage_scale: config.voltage_scale,
                    analog_offset: config.analog_offset,
                    capture_count,
                    accumulation: block.accumulation.clone(),
                    captured_at,
                    samples,
                    times,
                };
                // A send error only means no subscriber is listening right
                // now; the loop keeps capturing either way.
                let _ = frames.send(Arc::new(frame));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::device::{BlockCapture, ChannelCapture};
    use crate::acquisition::settings::{
        AcqSettings, ChannelConfig, Coupling, TimebaseConfig,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    /// Deterministic device: each capture is a ramp offset by the capture
    /// ordinal, so frame ordering is checkable.
    struct RampDevice {
        counter: AtomicU64,
    }

    impl RampDevice {
        fn new() -> Self {
            Self {
                counter: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl CaptureDevice for RampDevice {
        async fn run_block(&self, snapshot: &AcqSnapshot) -> GatewayResult<BlockCapture> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            let ordinal = self.counter.fetch_add(1, Ordering::SeqCst);
            let channels = snapshot
                .channels
                .iter()
                .map(|ch| ChannelCapture {
                    channel: ch.channel,
                    series: vec![(0..snapshot.timebase.samples as usize)
                        .map(|i| ordinal as f64 + i as f64 * 0.001)
                        .collect()],
                })
                .collect();
            Ok(BlockCapture {
                channels,
                accumulation: "none".to_string(),
            })
        }
    }

    fn snapshot() -> AcqSnapshot {
        let mut settings = AcqSettings::new();
        settings
            .set_channel(ChannelConfig {
                channel: 0,
                active: true,
                resolution_bits: 8,
                coupling: Coupling::Dc,
                voltage_scale: 1.0,
                analog_offset: 0.0,
            })
            .unwrap();
        settings
            .set_timebase(TimebaseConfig {
                index: 4,
                samples: 16,
                pre_trigger_samples: 0,
            })
            .unwrap();
        settings.snapshot().unwrap()
    }

    #[tokio::test]
    async fn subscribers_see_identical_ordered_frames() {
        let streamer = AcquisitionStreamer::new(Arc::new(RampDevice::new()), 64);
        streamer.start_loop(snapshot()).unwrap();

        let mut sub_a = streamer.subscribe().unwrap();
        let mut sub_b = streamer.subscribe().unwrap();

        let mut counts_a = Vec::new();
        let mut counts_b = Vec::new();
        for _ in 0..4 {
            counts_a.push(sub_a.next().await.unwrap().capture_count);
            counts_b.push(sub_b.next().await.unwrap().capture_count);
        }

        assert_eq!(counts_a, counts_b);
        assert!(counts_a.windows(2).all(|w| w[1] == w[0] + 1));

        streamer.stop_loop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_ends_subscriber_streams_cleanly() {
        let streamer = AcquisitionStreamer::new(Arc::new(RampDevice::new()), 64);
        streamer.start_loop(snapshot()).unwrap();
        let mut sub = streamer.subscribe().unwrap();

        assert!(sub.next().await.is_some());
        streamer.stop_loop().await.unwrap();

        // The backlog drains, then the stream ends without error.
        while sub.next().await.is_some() {}
        assert!(!streamer.is_streaming());
    }

    #[tokio::test]
    async fn lagging_subscriber_sheds_frames_without_disturbing_the_fast_one() {
        // Queue depth 4: a subscriber that stalls while a dozen frames go by
        // must lose its oldest frames, not stall the producer or its peer.
        let streamer = AcquisitionStreamer::new(Arc::new(RampDevice::new()), 4);
        streamer.start_loop(snapshot()).unwrap();

        let mut fast = streamer.subscribe().unwrap();
        let mut slow = streamer.subscribe().unwrap();

        let mut fast_counts = Vec::new();
        for _ in 0..12 {
            fast_counts.push(fast.next().await.unwrap().capture_count);
        }
        assert!(
            fast_counts.windows(2).all(|w| w[1] == w[0] + 1),
            "fast subscriber sequence had gaps: {:?}",
            fast_counts
        );

        // The stalled subscriber resumes at the oldest retained frame and
        // the loss is counted.
        let resumed = slow.next().await.unwrap();
        assert!(resumed.capture_count > 1);
        assert!(streamer.dropped_frames() > 0);

        // Later frames still arrive in order for the slow subscriber.
        let following = slow.next().await.unwrap();
        assert_eq!(following.capture_count, resumed.capture_count + 1);

        streamer.stop_loop().await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_while_idle_is_rejected() {
        let streamer = AcquisitionStreamer::new(Arc::new(RampDevice::new()), 64);
        assert!(matches!(
            streamer.subscribe().unwrap_err(),
            GatewayError::InvalidState { .. }
        ));
    }

    #[tokio::test]
    async fn double_start_is_rejected_and_stop_is_idempotent() {
        let streamer = AcquisitionStreamer::new(Arc::new(RampDevice::new()), 64);
        streamer.start_loop(snapshot()).unwrap();
        assert!(matches!(
            streamer.start_loop(snapshot()).unwrap_err(),
            GatewayError::InvalidState { .. }
        ));

        streamer.stop_loop().await.unwrap();
        streamer.stop_loop().await.unwrap();
        assert!(!streamer.is_streaming());
    }
}
