//! Acquisition settings: per-channel configuration, trigger, timebase, and
//! the instrument's enumerated valid values.
//!
//! Settings are owned by the scope session's command worker and mutated only
//! there; the capture loop takes an immutable [`AcqSnapshot`] at the start of
//! each cycle so a mid-capture reconfigure can never tear a frame.

use crate::error::{GatewayError, GatewayResult};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Highest channel index on the supported scope family (4 analog channels).
pub const MAX_CHANNEL: u8 = 3;

/// Input coupling for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
}

impl Coupling {
    /// All valid coupling names, as exposed to callers.
    pub fn valid_names() -> Vec<String> {
        vec!["AC".to_string(), "DC".to_string()]
    }
}

impl FromStr for Coupling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AC" => Ok(Coupling::Ac),
            "DC" => Ok(Coupling::Dc),
            other => Err(format!("unrecognized coupling type '{}'", other)),
        }
    }
}

impl fmt::Display for Coupling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coupling::Ac => write!(f, "AC"),
            Coupling::Dc => write!(f, "DC"),
        }
    }
}

/// Edge direction for the simple trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDirection {
    Rising,
    Falling,
}

impl TriggerDirection {
    /// All valid trigger direction names, as exposed to callers.
    pub fn valid_names() -> Vec<String> {
        vec!["RISING".to_string(), "FALLING".to_string()]
    }
}

impl FromStr for TriggerDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RISING" => Ok(TriggerDirection::Rising),
            "FALLING" => Ok(TriggerDirection::Falling),
            other => Err(format!("unrecognized trigger direction '{}'", other)),
        }
    }
}

/// One channel's acquisition settings. Keyed by `channel`; unique per index.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub channel: u8,
    pub active: bool,
    pub resolution_bits: u32,
    pub coupling: Coupling,
    pub voltage_scale: f64,
    pub analog_offset: f64,
}

/// Acquisition-wide trigger settings; at most one per session.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    pub channel: u8,
    pub threshold_volts: f64,
    pub direction: TriggerDirection,
    pub holdoff: u32,
}

/// Acquisition-wide timebase settings; at most one per session.
#[derive(Debug, Clone, PartialEq)]
pub struct TimebaseConfig {
    pub index: u32,
    pub samples: u32,
    pub pre_trigger_samples: u32,
}

/// Valid voltage scales: first digits 1/2/5 across four decades, 10 mV to
/// 50 V full scale.
pub fn valid_voltage_scales() -> Vec<(String, f64)> {
    let mut scales = Vec::with_capacity(12);
    for exponent in 1..=4i32 {
        for first_digit in [1.0f64, 2.0, 5.0] {
            let volts = first_digit * 10f64.powi(exponent - 3);
            scales.push((format!("+/-{}", format_volts(volts)), volts));
        }
    }
    scales
}

/// Valid timebase scales in seconds per division: 5/10/20 across eleven
/// decades, sorted ascending.
pub fn valid_time_scales() -> Vec<f64> {
    let mut scales = Vec::new();
    for first_digit in [5.0f64, 10.0, 20.0] {
        for magnitude in -9..=1i32 {
            scales.push(first_digit * 10f64.powi(magnitude));
        }
    }
    scales.sort_by(|a, b| a.total_cmp(b));
    scales
}

fn format_volts(volts: f64) -> String {
    if volts < 1.0 {
        format!("{:.0} mV", volts * 1e3)
    } else {
        format!("{:.0} V", volts)
    }
}

/// Resolve a timebase index to its sample interval in nanoseconds for the
/// given ADC resolution.
///
/// The mapping is the hardware's: at 8 bit, indices below 3 are power-of-two
/// nanoseconds and everything above runs at 125 MS/s steps; at 12 bit the
/// fastest index is 1 and the linear region runs at 62.5 MS/s steps.
pub fn sample_interval_ns(index: u32, resolution_bits: u32) -> GatewayResult<f64> {
    match resolution_bits {
        8 => {
            if index < 3 {
                Ok(f64::from(1u32 << index))
            } else {
                Ok(f64::from(index - 2) / 0.125)
            }
        }
        12 => {
            if index < 1 {
                Err(GatewayError::RejectedParameter(format!(
                    "timebase index {} invalid at 12 bit",
                    index
                )))
            } else if index < 4 {
                Ok(f64::from(1u32 << (index - 1)) * 2.0)
            } else {
                Ok(f64::from(index - 3) / 0.0625)
            }
        }
        other => Err(GatewayError::RejectedParameter(format!(
            "unsupported resolution: {} bit",
            other
        ))),
    }
}

/// Immutable view of the settings taken at the start of one capture cycle.
#[derive(Debug, Clone)]
pub struct AcqSnapshot {
    pub channels: Vec<ChannelConfig>,
    pub timebase: TimebaseConfig,
    pub sample_interval_ns: f64,
}

/// The full mutable settings set for one scope session.
#[derive(Debug, Default)]
pub struct AcqSettings {
    channels: BTreeMap<u8, ChannelConfig>,
    trigger: Option<TriggerConfig>,
    timebase: Option<TimebaseConfig>,
}

impl AcqSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a channel configuration. Last write wins per channel index.
    pub fn set_channel(&mut self, config: ChannelConfig) -> GatewayResult<()> {
        if config.channel > MAX_CHANNEL {
            return Err(GatewayError::RejectedParameter(format!(
                "channel index {} out of range 0..={}",
                config.channel, MAX_CHANNEL
            )));
        }
        if !matches!(config.resolution_bits, 8 | 12 | 14) {
            return Err(GatewayError::RejectedParameter(format!(
                "unsupported resolution: {} bit",
                config.resolution_bits
            )));
        }
        let valid = valid_voltage_scales();
        if !valid
            .iter()
            .any(|(_, v)| (v - config.voltage_scale).abs() < 1e-12)
        {
            return Err(GatewayError::RejectedParameter(format!(
                "voltage scale {} is not a valid range",
                config.voltage_scale
            )));
        }
        self.channels.insert(config.channel, config);
        Ok(())
    }

    /// Apply trigger settings. The trigger source must be a configured,
    /// active channel so the threshold can be referred to its voltage range.
    pub fn set_trigger(&mut self, config: TriggerConfig) -> GatewayResult<()> {
        match self.channels.get(&config.channel) {
            Some(ch) if ch.active => {}
            _ => {
                return Err(GatewayError::RejectedParameter(format!(
                    "trigger channel {} is not an active channel",
                    config.channel
                )));
            }
        }
        self.trigger = Some(config);
        Ok(())
    }

    /// Apply timebase settings. The index is validated against the slowest
    /// configured channel resolution (8 bit when no channel is configured).
    pub fn set_timebase(&mut self, config: TimebaseConfig) -> GatewayResult<()> {
        if config.samples == 0 {
            return Err(GatewayError::RejectedParameter(
                "sample count must be positive".to_string(),
            ));
        }
        if config.pre_trigger_samples > config.samples {
            return Err(GatewayError::RejectedParameter(
                "pre-trigger samples exceed total samples".to_string(),
            ));
        }
        let resolution = self.resolution_bits();
        sample_interval_ns(config.index, resolution)?;
        self.timebase = Some(config);
        Ok(())
    }

    /// Channels currently marked active, in index order.
    pub fn active_channels(&self) -> Vec<&ChannelConfig> {
        self.channels.values().filter(|c| c.active).collect()
    }

    /// Look up one channel's configuration.
    pub fn channel(&self, index: u8) -> Option<&ChannelConfig> {
        self.channels.get(&index)
    }

    /// Current trigger configuration, if set.
    pub fn trigger(&self) -> Option<&TriggerConfig> {
        self.trigger.as_ref()
    }

    /// Current timebase configuration, if set.
    pub fn timebase(&self) -> Option<&TimebaseConfig> {
        self.timebase.as_ref()
    }

    fn resolution_bits(&self) -> u32 {
        self.channels
            .values()
            .filter(|c| c.active)
            .map(|c| c.resolution_bits)
            .max()
            .unwrap_or(8)
    }

    /// Copy-on-read snapshot for one capture cycle. Fails with
    /// `InvalidState` when streaming preconditions are unmet: at least one
    /// active channel and a timebase.
    pub fn snapshot(&self) -> GatewayResult<AcqSnapshot> {
        let channels: Vec<ChannelConfig> = self
            .channels
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect();
        if channels.is_empty() {
            return Err(GatewayError::InvalidState {
                state: "Idle".to_string(),
                operation: "start_loop with no active channels".to_string(),
            });
        }
        let timebase = self.timebase.clone().ok_or_else(|| GatewayError::InvalidState {
            state: "Idle".to_string(),
            operation: "start_loop with no timebase configured".to_string(),
        })?;
        let sample_interval_ns = sample_interval_ns(timebase.index, self.resolution_bits())?;
        Ok(AcqSnapshot {
            channels,
            timebase,
            sample_interval_ns,
        })
    }
}
