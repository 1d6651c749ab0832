//! Scope session streaming behaviour: preconditions, fan-out, clean stop.

use lab_gateway::acquisition::{
    ChannelConfig, Coupling, SimulatedScope, TimebaseConfig, TriggerConfig, TriggerDirection,
};
use lab_gateway::config::SessionSettings;
use lab_gateway::error::GatewayError;
use lab_gateway::session::{scope::ScopeSession, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn session() -> ScopeSession {
    let device = Arc::new(SimulatedScope::new(Duration::from_millis(2)));
    ScopeSession::new(device, &SessionSettings::default(), 64)
}

fn channel(index: u8, scale: f64) -> ChannelConfig {
    ChannelConfig {
        channel: index,
        active: true,
        resolution_bits: 8,
        coupling: Coupling::Dc,
        voltage_scale: scale,
        analog_offset: 0.0,
    }
}

fn timebase() -> TimebaseConfig {
    TimebaseConfig {
        index: 4,
        samples: 32,
        pre_trigger_samples: 8,
    }
}

#[tokio::test]
async fn start_without_active_channel_emits_nothing() {
    let session = session();
    session.configure_timebase(timebase()).await.unwrap();

    let err = session.start_loop().await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidState { .. }));
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.subscribe().is_err());
}

#[tokio::test]
async fn deactivated_channels_do_not_count() {
    let session = session();
    let mut inactive = channel(0, 1.0);
    inactive.active = false;
    session.configure_channel(inactive).await.unwrap();
    session.configure_timebase(timebase()).await.unwrap();

    assert!(session.start_loop().await.is_err());
}

#[tokio::test]
async fn both_subscribers_see_the_same_ordered_frames() {
    let session = session();
    session.configure_channel(channel(0, 1.0)).await.unwrap();
    session.configure_channel(channel(1, 0.2)).await.unwrap();
    session.configure_timebase(timebase()).await.unwrap();
    session.start_loop().await.unwrap();

    let mut sub_a = session.subscribe().unwrap();
    let mut sub_b = session.subscribe().unwrap();

    // The two subscriptions may start mid-capture; align both on the first
    // channel-0 frame of a common capture before comparing.
    let sync = sub_b.next().await.unwrap().capture_count + 1;
    let mut seq_a = Vec::new();
    let mut seq_b = Vec::new();
    while seq_a.len() < 6 {
        let frame = sub_a.next().await.unwrap();
        if frame.capture_count >= sync {
            seq_a.push((frame.capture_count, frame.channel));
        }
    }
    while seq_b.len() < 6 {
        let frame = sub_b.next().await.unwrap();
        if frame.capture_count >= sync {
            seq_b.push((frame.capture_count, frame.channel));
        }
    }
    assert_eq!(seq_a, seq_b);

    // Within one capture, channels come out in index order.
    let first_capture = seq_a[0].0;
    let channels: Vec<u8> = seq_a
        .iter()
        .filter(|(c, _)| *c == first_capture)
        .map(|(_, ch)| *ch)
        .collect();
    assert_eq!(channels, vec![0, 1]);

    session.stop_loop().await.unwrap();
}

#[tokio::test]
async fn frames_carry_acquisition_metadata() {
    let session = session();
    session.configure_channel(channel(2, 0.5)).await.unwrap();
    session.configure_timebase(timebase()).await.unwrap();
    session.start_loop().await.unwrap();

    let mut sub = session.subscribe().unwrap();
    let frame = sub.next().await.unwrap();
    assert_eq!(frame.channel, 2);
    assert_eq!(frame.voltage_scale, 0.5);
    assert_eq!(frame.resolution_bits, 8);
    assert_eq!(frame.sample_interval_ns, 16.0);
    assert_eq!(frame.samples.len(), 32);
    assert_eq!(frame.times.len(), 32);
    assert_eq!(frame.times[0], 0.0);
    assert!((frame.times[1] - 16e-9).abs() < 1e-15);
    assert_eq!(frame.accumulation, "none");

    session.stop_loop().await.unwrap();
}

#[tokio::test]
async fn stop_ends_streams_and_allows_reconfiguration() {
    let session = session();
    session.configure_channel(channel(0, 1.0)).await.unwrap();
    session.configure_timebase(timebase()).await.unwrap();
    session.start_loop().await.unwrap();
    assert_eq!(session.last_status(), "streaming");

    let mut sub = session.subscribe().unwrap();
    assert!(sub.next().await.is_some());

    tokio_test::assert_ok!(session.stop_loop().await);
    assert_eq!(session.last_status(), "idle");
    while sub.next().await.is_some() {}

    // Reconfigure and restart with a different timebase.
    session
        .configure_timebase(TimebaseConfig {
            index: 10,
            samples: 16,
            pre_trigger_samples: 0,
        })
        .await
        .unwrap();
    session.start_loop().await.unwrap();

    let mut sub = session.subscribe().unwrap();
    let frame = sub.next().await.unwrap();
    assert_eq!(frame.samples.len(), 16);
    assert_eq!(frame.sample_interval_ns, 64.0);

    session.stop_loop().await.unwrap();
}

#[tokio::test]
async fn configuration_round_trips_through_read_back() {
    let session = session();
    session.configure_channel(channel(0, 1.0)).await.unwrap();
    session.configure_channel(channel(3, 0.05)).await.unwrap();
    session
        .configure_trigger(TriggerConfig {
            channel: 0,
            threshold_volts: 0.25,
            direction: TriggerDirection::Falling,
            holdoff: 2,
        })
        .await
        .unwrap();
    session.configure_timebase(timebase()).await.unwrap();

    let read = session.read_back().await.unwrap();
    assert_eq!(read.channels.len(), 2);
    assert_eq!(read.channels[1].channel, 3);
    assert_eq!(read.channels[1].voltage_scale, 0.05);
    let trigger = read.trigger.unwrap();
    assert_eq!(trigger.direction, TriggerDirection::Falling);
    assert_eq!(read.timebase.unwrap().pre_trigger_samples, 8);
}
