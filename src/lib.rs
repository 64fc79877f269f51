//! pubgate - Rate limiting for Builder's Pub
//!
//! Per-action, per-identity fixed-window quotas for comments, upvotes,
//! project and collaboration creation, and anonymous error reports. Counts
//! live in an injected store; the limiter decides admit/reject and reports
//! how long a rejected caller should wait.

pub mod config;
pub mod error;
pub mod grpc;
pub mod identity;
pub mod ratelimit;
