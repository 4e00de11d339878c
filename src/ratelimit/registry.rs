//! Concurrent registry of token buckets.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::bucket::TokenBucket;
use super::descriptor::BucketKey;

/// Owns every bucket, keyed by [`BucketKey`].
///
/// Buckets are created on first use and live as long as the registry. Key
/// cardinality is bounded by routes times principals, so nothing is evicted.
/// Each bucket carries its own lock; the map's shard lock is only held long
/// enough to find or insert an entry.
#[derive(Debug, Default)]
pub struct BucketRegistry {
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the bucket for `key`, creating a full one if none exists yet.
    ///
    /// Exactly one bucket is ever created per key, even when many callers
    /// race on its first use. `capacity` and `period_ms` only apply to a
    /// newly created bucket.
    pub fn get_or_create(
        &self,
        key: &BucketKey,
        capacity: u32,
        period_ms: u64,
        now_ms: i64,
    ) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(key.as_str()) {
            return Arc::clone(bucket.value());
        }

        let entry = self
            .buckets
            .entry(key.as_str().to_string())
            .or_insert_with(|| {
                debug!(
                    key = %key,
                    capacity = capacity,
                    period_ms = period_ms,
                    "Creating new token bucket"
                );
                Arc::new(TokenBucket::new(capacity, period_ms, now_ms))
            });
        Arc::clone(entry.value())
    }

    /// Look up an existing bucket without creating one.
    pub fn get(&self, key: &BucketKey) -> Option<Arc<TokenBucket>> {
        self.buckets.get(key.as_str()).map(|b| Arc::clone(b.value()))
    }

    /// Number of buckets created so far.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
