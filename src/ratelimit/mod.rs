//! Rate limiting logic and counter storage.

mod clock;
mod key;
mod limiter;
mod policy;
mod request;
mod store;
mod sweeper;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::RateLimitKey;
pub use limiter::{check_rate_limit, Consistency, FailurePolicy, LimiterOptions, RateLimiter};
pub use policy::{ActionPolicy, RateLimitPolicies};
pub use request::{RateLimitDecision, RateLimitRequest};
pub use store::{MemoryStore, RateLimitStore, SqliteStore, StoreError};
pub use sweeper::{spawn_sweeper, sweep_once};
pub use window::{FixedWindow, TimeUnit};
