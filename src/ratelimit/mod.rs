//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod descriptor;
mod limiter;
mod pattern;
mod registry;
mod rejection;
mod rules;

pub use bucket::{Admission, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use descriptor::{diff_flag, BucketKey, RequestDescriptor, DIFF_PARAM, UNKNOWN_PRINCIPAL};
pub use limiter::{Decision, RateLimiter};
pub use pattern::PathPattern;
pub use registry::BucketRegistry;
pub use rejection::{fallback_body, ErrorEnvelope, Rejection};
pub use rules::{Policy, PolicyConfig, PolicyMap, PolicySet, DEFAULT_CAPACITY, DEFAULT_PERIOD_MS};
