//! gRPC surface of the gateway.
//!
//! Two services share one server: `LaserGateway` for slow scalar control of
//! the tunable laser, and `ScopeGateway` for oscilloscope configuration and
//! server-streamed trace delivery.

pub mod server;
pub mod service;

/// Generated Protocol Buffer definitions from `proto/gateway.proto`.
pub mod proto {
    tonic::include_proto!("labgateway");
}

pub use server::start_server;
pub use service::{LaserGatewayService, ScopeGatewayService};

pub use proto::laser_gateway_client::LaserGatewayClient;
pub use proto::laser_gateway_server::{LaserGateway, LaserGatewayServer};
pub use proto::scope_gateway_client::ScopeGatewayClient;
pub use proto::scope_gateway_server::{ScopeGateway, ScopeGatewayServer};
pub use proto::{Ack, ConfigReply, TraceBatch};
