//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::pubgate::ratelimit::v1::rate_limit_service_server::RateLimitServiceServer;
use super::service::RateLimitServiceImpl;
use crate::error::{PubgateError, Result};
use crate::ratelimit::RateLimiter;

/// gRPC server for the rate limit service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    /// Salt for anonymous subjects
    identity_salt: String,
}

impl GrpcServer {
    /// Create a new gRPC server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>, identity_salt: impl Into<String>) -> Self {
        Self {
            addr,
            rate_limiter,
            identity_salt: identity_salt.into(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = RateLimitServiceImpl::new(self.rate_limiter, self.identity_salt);

        info!(
            addr = %self.addr,
            "Starting gRPC server for RateLimitService"
        );

        Server::builder()
            .add_service(RateLimitServiceServer::new(service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                PubgateError::Grpc(e)
            })
    }
}
