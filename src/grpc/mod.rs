//! gRPC surface for out-of-process callers.

mod server;
mod service;

pub use server::GrpcServer;
pub use service::RateLimitServiceImpl;

// Include the generated protobuf code
pub mod proto {
    pub mod pubgate {
        pub mod ratelimit {
            pub mod v1 {
                tonic::include_proto!("pubgate.ratelimit.v1");
            }
        }
    }
}

// Re-export commonly used types
pub use proto::pubgate::ratelimit::v1::{
    check_rate_limit_request::Subject, check_rate_limit_response::Code,
    rate_limit_service_server::RateLimitServiceServer, AnonymousSubject, CheckRateLimitRequest,
    CheckRateLimitResponse,
};
