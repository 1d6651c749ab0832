//! Oscilloscope acquisition: settings, the capture device boundary, and the
//! streaming loop.

pub mod device;
pub mod settings;
pub mod streamer;

pub use device::{BlockCapture, CaptureDevice, ChannelCapture, SimulatedScope};
pub use settings::{
    AcqSettings, AcqSnapshot, ChannelConfig, Coupling, TimebaseConfig, TriggerConfig,
    TriggerDirection,
};
pub use streamer::{AcquisitionStreamer, FrameSubscription, TraceFrame};
