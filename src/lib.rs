//! # Lab Gateway Core Library
//!
//! Gateway daemon that fronts bench instruments with a gRPC API. It speaks
//! each instrument's native control protocol on one side and a uniform
//! session/streaming surface on the other, so experiment clients never deal
//! with sockets, polling loops, or vendor quirks directly.
//!
//! ## Crate Structure
//!
//! - **`link`**: the instrument connection layer. One [`link::InstrumentLink`]
//!   owns one framed connection; `link::protocol` holds the laser's
//!   command vocabulary and line parsing.
//! - **`convergence`**: polling loop for slowly-settling readings, with a
//!   pure state machine at its core.
//! - **`session`**: per-instrument actor tasks that serialize commands and
//!   own lifecycle state.
//! - **`acquisition`**: oscilloscope settings, the capture device boundary,
//!   and the streaming fan-out.
//! - **`grpc`**: the tonic services and server assembly.
//! - **`config`** / **`error`** / **`telemetry`**: settings loading, the
//!   central [`error::GatewayError`] enum, and tracing setup.

pub mod acquisition;
pub mod config;
pub mod convergence;
pub mod error;
pub mod grpc;
pub mod link;
pub mod session;
pub mod telemetry;

pub use config::Settings;
pub use error::{GatewayError, GatewayResult};
