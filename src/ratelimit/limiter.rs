//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::bucket::Admission;
use super::clock::{Clock, SystemClock};
use super::descriptor::{BucketKey, RequestDescriptor};
use super::registry::BucketRegistry;
use super::rejection::Rejection;
use super::rules::PolicySet;

/// Outcome of checking one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No policy governs the request path.
    Bypass,
    /// A token was consumed from the request's bucket.
    Admitted {
        policy: String,
        key: String,
        remaining: u32,
    },
    /// The request's bucket is empty.
    Rejected {
        policy: String,
        key: String,
        retry_after: Duration,
        timestamp_ms: i64,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Rejected { .. })
    }

    /// The rejection to send back, if the request was denied.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Decision::Rejected {
                retry_after,
                timestamp_ms,
                ..
            } => Some(Rejection::new(*retry_after, *timestamp_ms)),
            _ => None,
        }
    }
}

/// The admission controller: policy resolution, keying and buckets.
///
/// Checks run synchronously on the caller's task and never block on I/O.
/// Buckets for different keys never contend with each other.
pub struct RateLimiter {
    policies: PolicySet,
    buckets: BucketRegistry,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter over `policies` using the system clock.
    pub fn new(policies: PolicySet) -> Self {
        Self::with_clock(policies, Arc::new(SystemClock))
    }

    /// Create a rate limiter with an explicit time source.
    pub fn with_clock(policies: PolicySet, clock: Arc<dyn Clock>) -> Self {
        Self {
            policies,
            buckets: BucketRegistry::new(),
            clock,
        }
    }

    /// Check whether `request` may proceed, consuming a token if so.
    pub fn check(&self, request: &RequestDescriptor) -> Decision {
        let Some(policy) = self.policies.resolve(&request.path) else {
            trace!(path = %request.path, "No rate limit policy matches");
            return Decision::Bypass;
        };

        let key = BucketKey::build(policy, request);
        let capacity = policy.effective_capacity(request.diff);
        let now = self.clock.now_millis();

        trace!(
            policy = %policy.id(),
            key = %key,
            capacity = capacity,
            "Checking rate limit"
        );

        let bucket = self
            .buckets
            .get_or_create(&key, capacity, policy.period_ms(), now);

        match bucket.try_acquire(now) {
            Admission::Admitted { remaining } => Decision::Admitted {
                policy: policy.id().to_string(),
                key: key.into_string(),
                remaining,
            },
            Admission::Rejected { retry_after } => {
                debug!(
                    policy = %policy.id(),
                    key = %key,
                    retry_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                Decision::Rejected {
                    policy: policy.id().to_string(),
                    key: key.into_string(),
                    retry_after,
                    timestamp_ms: now,
                }
            }
        }
    }

    /// Current token count for a bucket, if it has been created.
    pub fn available_tokens(&self, key: &BucketKey) -> Option<f64> {
        let now = self.clock.now_millis();
        self.buckets.get(key).map(|bucket| bucket.available(now))
    }

    /// Number of buckets created so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Whether there is anything to enforce.
    pub fn is_active(&self) -> bool {
        !self.policies.is_empty()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policies", &self.policies.len())
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::rules::PolicyMap;

    fn limiter(yaml: &str) -> (RateLimiter, Arc<ManualClock>) {
        let map: PolicyMap = serde_yaml::from_str(yaml).unwrap();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let limiter = RateLimiter::with_clock(PolicySet::compile(&map).unwrap(), clock.clone());
        (limiter, clock)
    }

    fn from(path: &str, addr: &str) -> RequestDescriptor {
        RequestDescriptor::new(path).with_peer_addr(addr.parse().unwrap())
    }

    fn admitted(limiter: &RateLimiter, request: &RequestDescriptor, attempts: usize) -> usize {
        (0..attempts)
            .filter(|_| limiter.check(request).is_allowed())
            .count()
    }

    const CHECK_POLICY: &str = r#"
check:
  capacity: 5
  period_ms: 10000
  paths: ["/check"]
  per_principal: false
"#;

    #[test]
    fn test_rate_limiter_creation() {
        let (limiter, _) = limiter(CHECK_POLICY);
        assert_eq!(limiter.bucket_count(), 0);
        assert!(limiter.is_active());
    }

    #[test]
    fn test_check_example_policy() {
        let (limiter, clock) = limiter(CHECK_POLICY);
        let request = from("/check", "10.0.0.1");

        for remaining in (0..5).rev() {
            assert_eq!(
                limiter.check(&request),
                Decision::Admitted {
                    policy: "check".to_string(),
                    key: "/check".to_string(),
                    remaining,
                }
            );
        }

        let decision = limiter.check(&request);
        assert!(!decision.is_allowed());
        assert!(decision.rejection().is_some());

        clock.advance(10_000);
        assert!(limiter.check(&request).is_allowed());
    }

    #[test]
    fn test_rejection_reports_exact_retry_delay() {
        let (limiter, clock) = limiter(CHECK_POLICY);
        let request = from("/check", "10.0.0.1");
        admitted(&limiter, &request, 5);

        clock.advance(500);
        match limiter.check(&request) {
            Decision::Rejected {
                retry_after,
                timestamp_ms,
                ..
            } => {
                assert_eq!(retry_after, Duration::from_millis(1_500));
                assert_eq!(timestamp_ms, 1_000_500);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_half_period_admits_half_capacity() {
        let (limiter, clock) = limiter(
            "poll: { capacity: 10, period_ms: 60000, paths: [\"/poll\"] }",
        );
        let request = from("/poll", "10.0.0.1");

        assert_eq!(admitted(&limiter, &request, 20), 10);
        clock.advance(30_000);
        assert_eq!(admitted(&limiter, &request, 20), 5);
        clock.advance(60_000);
        assert_eq!(admitted(&limiter, &request, 20), 10);
    }

    #[test]
    fn test_per_principal_policy_isolates_callers() {
        let (limiter, _) = limiter("send: { capacity: 3, paths: [\"/send\"] }");
        let alice = from("/send", "10.0.0.1");
        let bob = from("/send", "10.0.0.2");

        assert_eq!(admitted(&limiter, &alice, 10), 3);
        assert_eq!(admitted(&limiter, &bob, 10), 3);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_global_policy_pools_callers() {
        let (limiter, _) = limiter(CHECK_POLICY);

        assert_eq!(admitted(&limiter, &from("/check", "10.0.0.1"), 3), 3);
        assert_eq!(admitted(&limiter, &from("/check", "10.0.0.2"), 10), 2);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_diff_mode_uses_its_own_capacity_and_bucket() {
        let (limiter, _) = limiter(
            r#"
poll:
  capacity: 2
  diff_capacity: 6
  paths: ["/admin/check-new-messages"]
"#,
        );
        let plain = from("/admin/check-new-messages", "10.0.0.1");
        let diff = plain.clone().with_diff(true);

        assert_eq!(admitted(&limiter, &diff, 10), 6);
        assert_eq!(admitted(&limiter, &plain, 10), 2);

        let diff_key = BucketKey::from_parts("/admin/check-new-messages", true, Some("10.0.0.1"));
        assert_eq!(limiter.available_tokens(&diff_key), Some(0.0));
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_diff_mode_without_diff_capacity_is_tracked_separately() {
        let (limiter, _) = limiter("poll: { capacity: 2, paths: [\"/poll\"] }");
        let plain = from("/poll", "10.0.0.1");
        let diff = plain.clone().with_diff(true);

        assert_eq!(admitted(&limiter, &plain, 5), 2);
        assert_eq!(admitted(&limiter, &diff, 5), 2);
    }

    #[test]
    fn test_unmatched_route_is_never_limited() {
        let (limiter, _) = limiter(CHECK_POLICY);
        let request = from("/health", "10.0.0.1");

        for _ in 0..1_000 {
            assert_eq!(limiter.check(&request), Decision::Bypass);
        }
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_empty_policy_set_bypasses_everything() {
        let limiter = RateLimiter::new(PolicySet::new());
        assert!(!limiter.is_active());
        assert_eq!(limiter.check(&RequestDescriptor::new("/check")), Decision::Bypass);
    }

    #[test]
    fn test_forwarded_for_selects_principal() {
        let (limiter, _) = limiter("send: { capacity: 1, paths: [\"/send\"] }");
        let via_proxy = |client: &str| {
            from("/send", "10.0.0.254").with_forwarded_for(format!("{}, 10.0.0.254", client))
        };

        assert!(limiter.check(&via_proxy("203.0.113.1")).is_allowed());
        assert!(!limiter.check(&via_proxy("203.0.113.1")).is_allowed());
        assert!(limiter.check(&via_proxy("203.0.113.2")).is_allowed());
    }

    #[test]
    fn test_unattributable_requests_share_a_bucket() {
        let (limiter, _) = limiter("send: { capacity: 2, paths: [\"/send\"] }");
        let anonymous = RequestDescriptor::new("/send");

        assert_eq!(admitted(&limiter, &anonymous, 5), 2);
        let key = BucketKey::from_parts("/send", false, Some("unknown"));
        assert_eq!(limiter.available_tokens(&key), Some(0.0));
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_capacity() {
        let (limiter, _) = limiter("burst: { capacity: 100, per_principal: false, paths: [\"/burst\"] }");
        let allowed = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|s| {
            for i in 0..8 {
                let limiter = &limiter;
                let allowed = &allowed;
                s.spawn(move || {
                    let request = from("/burst", &format!("10.0.0.{}", i));
                    for _ in 0..50 {
                        if limiter.check(&request).is_allowed() {
                            allowed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.into_inner(), 100);
        assert_eq!(limiter.bucket_count(), 1);
    }
}
