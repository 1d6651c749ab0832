//! Capture device boundary.
//!
//! Everything above this trait deals in decoded volt arrays; everything
//! below it is instrument plumbing. The simulated implementation is always
//! available so the streaming path can be exercised with no hardware
//! attached.

use crate::acquisition::settings::AcqSnapshot;
use crate::error::GatewayResult;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Decoded samples for one channel from one capture, possibly split into
/// several series (e.g. min/max pairs under sample accumulation).
#[derive(Debug, Clone)]
pub struct ChannelCapture {
    pub channel: u8,
    pub series: Vec<Vec<f64>>,
}

/// One completed block capture across all active channels.
#[derive(Debug, Clone)]
pub struct BlockCapture {
    pub channels: Vec<ChannelCapture>,
    /// Accumulation mode applied by the hardware for this block.
    pub accumulation: String,
}

/// A block-capture instrument. One call is one armed-and-completed capture;
/// the caller owns pacing and cancellation.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn run_block(&self, snapshot: &AcqSnapshot) -> GatewayResult<BlockCapture>;
}

/// Software stand-in for a real digitizer: waits one capture interval, then
/// returns uniform noise scaled to each channel's voltage range.
pub struct SimulatedScope {
    capture_interval: Duration,
}

impl SimulatedScope {
    pub fn new(capture_interval: Duration) -> Self {
        Self { capture_interval }
    }
}

#[async_trait]
impl CaptureDevice for SimulatedScope {
    async fn run_block(&self, snapshot: &AcqSnapshot) -> GatewayResult<BlockCapture> {
        tokio::time::sleep(self.capture_interval).await;

        let samples = snapshot.timebase.samples as usize;
        let mut rng = rand::thread_rng();
        let channels = snapshot
            .channels
            .iter()
            .map(|ch| {
                let trace: Vec<f64> = (0..samples)
                    .map(|_| rng.gen_range(-ch.voltage_scale..ch.voltage_scale))
                    .collect();
                ChannelCapture {
                    channel: ch.channel,
                    series: vec![trace],
                }
            })
            .collect();

        Ok(BlockCapture {
            channels,
            accumulation: "none".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::settings::{AcqSettings, ChannelConfig, Coupling, TimebaseConfig};

    fn snapshot() -> AcqSnapshot {
        let mut settings = AcqSettings::new();
        settings
            .set_channel(ChannelConfig {
                channel: 0,
                active: true,
                resolution_bits: 8,
                coupling: Coupling::Dc,
                voltage_scale: 0.1,
                analog_offset: 0.0,
            })
            .unwrap();
        settings
            .set_timebase(TimebaseConfig {
                index: 4,
                samples: 64,
                pre_trigger_samples: 0,
            })
            .unwrap();
        settings.snapshot().unwrap()
    }

    #[tokio::test]
    async fn simulated_capture_matches_snapshot_shape() {
        let device = SimulatedScope::new(Duration::from_millis(1));
        let capture = device.run_block(&snapshot()).await.unwrap();

        assert_eq!(capture.channels.len(), 1);
        assert_eq!(capture.channels[0].channel, 0);
        assert_eq!(capture.channels[0].series.len(), 1);
        assert_eq!(capture.channels[0].series[0].len(), 64);
        assert!(capture.channels[0].series[0]
            .iter()
            .all(|v| v.abs() <= 0.1));
    }
}
