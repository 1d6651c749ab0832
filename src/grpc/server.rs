//! Server assembly and startup.

use crate::acquisition::SimulatedScope;
use crate::config::Settings;
use crate::grpc::proto::laser_gateway_server::LaserGatewayServer;
use crate::grpc::proto::scope_gateway_server::ScopeGatewayServer;
use crate::grpc::service::{LaserGatewayService, ScopeGatewayService};
use crate::session::{scope::ScopeSession, SessionManager};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::info;

/// Build the session manager and serve both gateway services until the
/// process is stopped.
pub async fn start_server(settings: Settings) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.bind_addr, settings.server.port)
        .parse()
        .context("invalid server bind address")?;

    let device = Arc::new(SimulatedScope::new(settings.acquisition.capture_interval));
    let scope = Arc::new(ScopeSession::new(
        device,
        &settings.session,
        settings.acquisition.frame_queue_depth,
    ));
    let sessions = Arc::new(SessionManager::new(
        settings.session.clone(),
        Arc::clone(&scope),
    ));

    info!(%addr, "gateway listening");
    Server::builder()
        .add_service(LaserGatewayServer::new(LaserGatewayService::new(sessions)))
        .add_service(ScopeGatewayServer::new(ScopeGatewayService::new(scope)))
        .serve(addr)
        .await
        .context("gRPC server failed")?;

    Ok(())
}
