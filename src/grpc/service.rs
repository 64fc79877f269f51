//! Rate limit service implementation.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, instrument, warn};

use super::proto::pubgate::ratelimit::v1::{
    check_rate_limit_request::Subject, check_rate_limit_response::Code,
    rate_limit_service_server::RateLimitService, CheckRateLimitRequest, CheckRateLimitResponse,
};

use crate::error::PubgateError;
use crate::identity::anonymous_identity;
use crate::ratelimit::{RateLimitDecision, RateLimiter};

/// Implementation of the `RateLimitService` gRPC interface.
pub struct RateLimitServiceImpl {
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
    /// Salt for hashing anonymous subjects
    identity_salt: String,
}

impl RateLimitServiceImpl {
    pub fn new(rate_limiter: Arc<RateLimiter>, identity_salt: impl Into<String>) -> Self {
        Self {
            rate_limiter,
            identity_salt: identity_salt.into(),
        }
    }

    fn identity(&self, subject: Option<Subject>) -> Result<String, Status> {
        match subject {
            Some(Subject::Identity(identity)) => Ok(identity),
            Some(Subject::Anonymous(anon)) => Ok(anonymous_identity(
                &self.identity_salt,
                Some(anon.user_id.as_str()),
                Some(anon.remote_addr.as_str()),
            )),
            None => Err(Status::invalid_argument("identity or anonymous subject is required")),
        }
    }
}

fn to_status(e: PubgateError) -> Status {
    match e {
        PubgateError::InvalidParameters(msg) => Status::invalid_argument(msg),
        PubgateError::UnknownAction(action) => {
            Status::not_found(format!("no rate limit policy for action '{}'", action))
        }
        other => Status::internal(other.to_string()),
    }
}

fn non_zero(value: u32) -> Option<u64> {
    (value != 0).then_some(u64::from(value))
}

#[tonic::async_trait]
impl RateLimitService for RateLimitServiceImpl {
    #[instrument(
        skip(self, request),
        fields(
            action = %request.get_ref().action,
            limit = request.get_ref().limit,
            window_seconds = request.get_ref().window_seconds
        )
    )]
    async fn check_rate_limit(
        &self,
        request: Request<CheckRateLimitRequest>,
    ) -> Result<Response<CheckRateLimitResponse>, Status> {
        let req = request.into_inner();

        if req.action.is_empty() {
            warn!("Received rate limit request with empty action");
            return Err(Status::invalid_argument("action is required"));
        }

        let identity = self.identity(req.subject)?;
        let rate_limit_request = self
            .rate_limiter
            .resolve(
                &req.action,
                &identity,
                non_zero(req.limit),
                non_zero(req.window_seconds),
            )
            .map_err(to_status)?;

        let decision = self
            .rate_limiter
            .check_rate_limit(&rate_limit_request)
            .await
            .map_err(to_status)?;

        let response = match decision {
            RateLimitDecision::Allowed => CheckRateLimitResponse {
                code: Code::Ok.into(),
                retry_after_seconds: 0,
            },
            RateLimitDecision::Limited {
                retry_after_seconds,
            } => CheckRateLimitResponse {
                code: Code::OverLimit.into(),
                retry_after_seconds: u32::try_from(retry_after_seconds).unwrap_or(u32::MAX),
            },
        };

        debug!(
            action = %req.action,
            code = ?response.code(),
            retry_after_seconds = response.retry_after_seconds,
            "Rate limit decision made"
        );

        Ok(Response::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::AnonymousSubject;
    use crate::ratelimit::{sweep_once, ManualClock, MemoryStore};
    use std::time::Duration;

    fn service() -> RateLimitServiceImpl {
        let rate_limiter = Arc::new(RateLimiter::new(Arc::new(MemoryStore::new())));
        RateLimitServiceImpl::new(rate_limiter, "test-salt")
    }

    fn request(action: &str, subject: Option<Subject>, limit: u32, window_seconds: u32) -> Request<CheckRateLimitRequest> {
        Request::new(CheckRateLimitRequest {
            action: action.to_string(),
            subject,
            limit,
            window_seconds,
        })
    }

    fn user(id: &str) -> Option<Subject> {
        Some(Subject::Identity(id.to_string()))
    }

    #[tokio::test]
    async fn test_empty_action_rejected() {
        let result = service().check_rate_limit(request("", user("u1"), 0, 0)).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_missing_subject_rejected() {
        let result = service().check_rate_limit(request("comment_add", None, 0, 0)).await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_empty_identity_rejected() {
        let result = service()
            .check_rate_limit(request("comment_add", user(""), 0, 0))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unknown_action_not_found() {
        let result = service()
            .check_rate_limit(request("mystery", user("u1"), 0, 0))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_policy_limits_apply() {
        let service = service();

        for _ in 0..5 {
            let response = service
                .check_rate_limit(request("comment_add", user("u1"), 0, 0))
                .await
                .unwrap()
                .into_inner();
            assert_eq!(response.code(), Code::Ok);
            assert_eq!(response.retry_after_seconds, 0);
        }

        let response = service
            .check_rate_limit(request("comment_add", user("u1"), 0, 0))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.code(), Code::OverLimit);
        assert!(response.retry_after_seconds >= 1 && response.retry_after_seconds <= 60);
    }

    #[tokio::test]
    async fn test_explicit_limit_for_adhoc_action() {
        let service = service();

        let first = service
            .check_rate_limit(request("newsletter_signup", user("u1"), 1, 86_400))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(first.code(), Code::Ok);

        let second = service
            .check_rate_limit(request("newsletter_signup", user("u1"), 1, 86_400))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(second.code(), Code::OverLimit);
    }

    #[tokio::test]
    async fn test_window_beyond_retention_rejected() {
        let retention = Duration::from_secs(2 * 86_400);
        // Start of a two-day window
        let clock = Arc::new(ManualClock::new(1_699_833_600_000));
        let store = Arc::new(MemoryStore::new());
        let rate_limiter = RateLimiter::new(store.clone())
            .with_clock(clock.clone())
            .with_max_window(retention.as_secs());
        let service = RateLimitServiceImpl::new(Arc::new(rate_limiter), "test-salt");

        let result = service
            .check_rate_limit(request("newsletter_signup", user("u1"), 1, 30 * 86_400))
            .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::InvalidArgument);

        let mut admitted = 0;
        for _ in 0..10 {
            let response = service
                .check_rate_limit(request("newsletter_signup", user("u1"), 1, 2 * 86_400))
                .await
                .unwrap()
                .into_inner();
            if response.code() == Code::Ok {
                admitted += 1;
            }
            clock.advance(Duration::from_secs(4 * 3600));
            sweep_once(store.as_ref(), clock.as_ref(), retention).await.unwrap();
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_anonymous_subjects_share_hashed_bucket() {
        let service = service();
        let anon = || {
            Some(Subject::Anonymous(AnonymousSubject {
                user_id: String::new(),
                remote_addr: "203.0.113.7".to_string(),
            }))
        };

        for _ in 0..10 {
            let response = service
                .check_rate_limit(request("error_report", anon(), 0, 0))
                .await
                .unwrap()
                .into_inner();
            assert_eq!(response.code(), Code::Ok);
        }

        let response = service
            .check_rate_limit(request("error_report", anon(), 0, 0))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.code(), Code::OverLimit);

        // The raw address is a different key and still has quota
        let response = service
            .check_rate_limit(request("error_report", user("203.0.113.7"), 0, 0))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.code(), Code::Ok);
    }
}
