//! gRPC service implementations for the two instrument personalities.
//!
//! Both services answer request/response calls with a uniform envelope
//! (`Ack` / `ConfigReply`): operational failures come back as
//! `ok/success = false` with a message, never as a transport-level error.
//! Only a dead stream subscription surfaces as a `Status`.

use crate::acquisition::settings::{
    sample_interval_ns, valid_time_scales, valid_voltage_scales, MAX_CHANNEL,
};
use crate::acquisition::{
    ChannelConfig, Coupling, TimebaseConfig, TraceFrame, TriggerConfig, TriggerDirection,
};
use crate::error::GatewayResult;
use crate::grpc::proto::{
    laser_gateway_server::LaserGateway, scope_gateway_server::ScopeGateway, Ack,
    AwaitReadyRequest, ChannelConfigRequest, ChannelTrace, ConfigReply, ConnectRequest, Empty,
    NameList, ScalarParameterRequest, TimeScaleList, TimebaseConfigRequest, TimebaseReply,
    TimebaseRequest, Timestamp, TraceBatch, TriggerConfigRequest, VoltageScale,
    VoltageScaleList,
};
use crate::link::LinkTarget;
use crate::session::{scope::ScopeSession, SessionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::debug;

fn ack_ok(status: impl Into<String>) -> Ack {
    Ack {
        ok: true,
        status: status.into(),
    }
}

fn ack_from(result: GatewayResult<String>) -> Ack {
    match result {
        Ok(status) => ack_ok(status),
        Err(e) => Ack {
            ok: false,
            status: e.envelope_message(),
        },
    }
}

fn reply_from(result: GatewayResult<()>, on_ok: &str) -> ConfigReply {
    match result {
        Ok(()) => ConfigReply {
            success: true,
            message: on_ok.to_string(),
        },
        Err(e) => ConfigReply {
            success: false,
            message: e.envelope_message(),
        },
    }
}

/// Laser control endpoints, delegating to the session manager.
pub struct LaserGatewayService {
    sessions: Arc<SessionManager>,
}

impl LaserGatewayService {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[tonic::async_trait]
impl LaserGateway for LaserGatewayService {
    async fn connect(&self, request: Request<ConnectRequest>) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        // The wire type is wider than a port number; reject rather than wrap.
        let Ok(port) = u16::try_from(req.port) else {
            return Ok(Response::new(Ack {
                ok: false,
                status: format!("port {} out of range", req.port),
            }));
        };
        let target = LinkTarget::Tcp {
            host: req.host,
            port,
        };
        let result = self
            .sessions
            .connect_laser(target)
            .await
            .map(|()| "connected".to_string());
        Ok(Response::new(ack_from(result)))
    }

    async fn set_scalar_parameter(
        &self,
        request: Request<ScalarParameterRequest>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let result = match self.sessions.laser().await {
            Ok(handle) => handle.set_scalar(&req.name, req.value).await,
            Err(e) => Err(e),
        };
        Ok(Response::new(ack_from(result)))
    }

    async fn is_ready(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        let ack = match self.sessions.laser().await {
            Ok(handle) => match handle.is_ready().await {
                Ok(true) => ack_ok("position stable"),
                Ok(false) => Ack {
                    ok: false,
                    status: "still settling".to_string(),
                },
                Err(e) => Ack {
                    ok: false,
                    status: e.envelope_message(),
                },
            },
            Err(e) => Ack {
                ok: false,
                status: e.envelope_message(),
            },
        };
        Ok(Response::new(ack))
    }

    async fn await_ready(
        &self,
        request: Request<AwaitReadyRequest>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let defaults = self.sessions.settings();
        let poll_interval = if req.poll_interval_ms == 0 {
            defaults.poll_interval
        } else {
            Duration::from_millis(u64::from(req.poll_interval_ms))
        };
        let max_misses = if req.max_misses == 0 {
            defaults.max_convergence_misses
        } else {
            req.max_misses
        };

        let result = match self.sessions.laser().await {
            Ok(handle) => handle
                .await_ready(poll_interval, max_misses)
                .await
                .map(|c| format!("converged at {} after {} misses", c.value, c.misses)),
            Err(e) => Err(e),
        };
        Ok(Response::new(ack_from(result)))
    }

    async fn disconnect(&self, _request: Request<Empty>) -> Result<Response<Ack>, Status> {
        // Disconnect reports success even with nothing to tear down.
        let ack = match self.sessions.laser().await {
            Ok(handle) => {
                let _ = handle.disconnect().await;
                ack_ok("disconnected")
            }
            Err(_) => ack_ok("no laser session"),
        };
        Ok(Response::new(ack))
    }
}

/// Scope configuration and streaming endpoints.
pub struct ScopeGatewayService {
    scope: Arc<ScopeSession>,
}

impl ScopeGatewayService {
    pub fn new(scope: Arc<ScopeSession>) -> Self {
        Self { scope }
    }
}

#[tonic::async_trait]
impl ScopeGateway for ScopeGatewayService {
    async fn get_valid_voltage_scales(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<VoltageScaleList>, Status> {
        let scales = valid_voltage_scales()
            .into_iter()
            .map(|(name, volts)| VoltageScale { name, volts })
            .collect();
        Ok(Response::new(VoltageScaleList { scales }))
    }

    async fn get_valid_time_scales(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<TimeScaleList>, Status> {
        Ok(Response::new(TimeScaleList {
            seconds: valid_time_scales(),
        }))
    }

    async fn get_valid_trigger_types(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<NameList>, Status> {
        Ok(Response::new(NameList {
            names: TriggerDirection::valid_names(),
        }))
    }

    async fn get_valid_coupling_types(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<NameList>, Status> {
        Ok(Response::new(NameList {
            names: Coupling::valid_names(),
        }))
    }

    async fn parse_timebase(
        &self,
        request: Request<TimebaseRequest>,
    ) -> Result<Response<TimebaseReply>, Status> {
        let req = request.into_inner();
        let reply = match sample_interval_ns(req.index, req.resolution_bits) {
            Ok(interval) => TimebaseReply {
                index: req.index,
                sample_interval_ns: interval,
                description: format!(
                    "{} ns per sample at {} bit",
                    interval, req.resolution_bits
                ),
                success: true,
            },
            Err(e) => TimebaseReply {
                index: req.index,
                sample_interval_ns: 0.0,
                description: e.envelope_message(),
                success: false,
            },
        };
        Ok(Response::new(reply))
    }

    async fn configure_channel(
        &self,
        request: Request<ChannelConfigRequest>,
    ) -> Result<Response<ConfigReply>, Status> {
        let req = request.into_inner();
        if req.channel > u32::from(MAX_CHANNEL) {
            return Ok(Response::new(ConfigReply {
                success: false,
                message: format!(
                    "channel index {} out of range 0..={}",
                    req.channel, MAX_CHANNEL
                ),
            }));
        }
        let coupling: Coupling = match req.coupling.parse() {
            Ok(c) => c,
            Err(msg) => {
                return Ok(Response::new(ConfigReply {
                    success: false,
                    message: msg,
                }));
            }
        };
        let config = ChannelConfig {
            channel: req.channel as u8,
            active: req.active,
            resolution_bits: req.resolution_bits,
            coupling,
            voltage_scale: req.voltage_scale,
            analog_offset: req.analog_offset,
        };
        let result = self.scope.configure_channel(config).await;
        Ok(Response::new(reply_from(result, "channel configured")))
    }

    async fn configure_trigger(
        &self,
        request: Request<TriggerConfigRequest>,
    ) -> Result<Response<ConfigReply>, Status> {
        let req = request.into_inner();
        if req.channel > u32::from(MAX_CHANNEL) {
            return Ok(Response::new(ConfigReply {
                success: false,
                message: format!(
                    "channel index {} out of range 0..={}",
                    req.channel, MAX_CHANNEL
                ),
            }));
        }
        let direction: TriggerDirection = match req.direction.parse() {
            Ok(d) => d,
            Err(msg) => {
                return Ok(Response::new(ConfigReply {
                    success: false,
                    message: msg,
                }));
            }
        };
        let config = TriggerConfig {
            channel: req.channel as u8,
            threshold_volts: req.threshold_volts,
            direction,
            holdoff: req.holdoff,
        };
        let result = self.scope.configure_trigger(config).await;
        Ok(Response::new(reply_from(result, "trigger configured")))
    }

    async fn configure_timebase(
        &self,
        request: Request<TimebaseConfigRequest>,
    ) -> Result<Response<ConfigReply>, Status> {
        let req = request.into_inner();
        let config = TimebaseConfig {
            index: req.index,
            samples: req.samples,
            pre_trigger_samples: req.pre_trigger_samples,
        };
        let result = self.scope.configure_timebase(config).await;
        Ok(Response::new(reply_from(result, "timebase configured")))
    }

    async fn start_loop(&self, _request: Request<Empty>) -> Result<Response<ConfigReply>, Status> {
        let result = self.scope.start_loop().await;
        Ok(Response::new(reply_from(result, "capture loop started")))
    }

    async fn stop_loop(&self, _request: Request<Empty>) -> Result<Response<ConfigReply>, Status> {
        let result = self.scope.stop_loop().await;
        Ok(Response::new(reply_from(result, "capture loop stopped")))
    }

    type StreamTracesStream = ReceiverStream<Result<TraceBatch, Status>>;

    async fn stream_traces(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::StreamTracesStream>, Status> {
        let mut subscription = self
            .scope
            .subscribe()
            .map_err(|e| Status::failed_precondition(e.envelope_message()))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            // Frames arrive per channel/series; group consecutive frames of
            // the same capture into one batch.
            let mut pending: Vec<ChannelTrace> = Vec::new();
            let mut pending_capture: u64 = 0;

            while let Some(frame) = subscription.next().await {
                if !pending.is_empty() && frame.capture_count != pending_capture {
                    let batch = TraceBatch {
                        traces: std::mem::take(&mut pending),
                    };
                    if tx.send(Ok(batch)).await.is_err() {
                        return;
                    }
                }
                pending_capture = frame.capture_count;
                pending.push(frame_to_proto(&frame));
            }

            if !pending.is_empty() {
                let _ = tx.send(Ok(TraceBatch { traces: pending })).await;
            }
            debug!("trace stream ended");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

fn frame_to_proto(frame: &TraceFrame) -> ChannelTrace {
    ChannelTrace {
        channel: u32::from(frame.channel),
        series: frame.series,
        sample_interval_ns: frame.sample_interval_ns,
        resolution_bits: frame.resolution_bits,
        voltage_scale: frame.voltage_scale,
        analog_offset: frame.analog_offset,
        capture_count: frame.capture_count,
        accumulation: frame.accumulation.clone(),
        captured_at: Some(Timestamp {
            seconds: frame.captured_at.timestamp(),
            nanos: frame.captured_at.timestamp_subsec_nanos() as i32,
        }),
        samples: frame.samples.clone(),
        times: frame.times.clone(),
    }
}
