//! Rate limit policies and route resolution.
//!
//! Policies are declared as an ordered mapping from policy id to rule. The
//! declaration order is significant: a request is governed by the first
//! policy that has a pattern matching its path, and later policies are never
//! consulted for that request.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tracing::info;

use super::pattern::PathPattern;
use crate::error::{Result, TurnstileError};

/// Default bucket capacity.
pub const DEFAULT_CAPACITY: u32 = 30;
/// Default refill period, in milliseconds.
pub const DEFAULT_PERIOD_MS: u64 = 60_000;

/// A policy as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Maximum tokens; also the count restored over one period
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Duration over which `capacity` tokens are restored
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Ant-style route patterns, tried in order
    #[serde(default)]
    pub paths: Vec<String>,
    /// Whether each caller address gets its own bucket
    #[serde(default = "default_per_principal")]
    pub per_principal: bool,
    /// Capacity used instead of `capacity` for diff-mode requests
    #[serde(default)]
    pub diff_capacity: Option<u32>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            period_ms: DEFAULT_PERIOD_MS,
            paths: Vec::new(),
            per_principal: true,
            diff_capacity: None,
        }
    }
}

fn default_capacity() -> u32 {
    DEFAULT_CAPACITY
}

fn default_period_ms() -> u64 {
    DEFAULT_PERIOD_MS
}

fn default_per_principal() -> bool {
    true
}

/// Policy configs keyed by id, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyMap(Vec<(String, PolicyConfig)>);

impl PolicyMap {
    /// Build a map from `(id, config)` pairs, keeping their order.
    pub fn new(entries: Vec<(String, PolicyConfig)>) -> Self {
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PolicyConfig)> {
        self.0.iter().map(|(id, cfg)| (id.as_str(), cfg))
    }
}

impl Serialize for PolicyMap {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, policy) in &self.0 {
            map.serialize_entry(id, policy)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PolicyMap {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PolicyMapVisitor;

        impl<'de> Visitor<'de> for PolicyMapVisitor {
            type Value = PolicyMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of policy id to policy")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<(String, PolicyConfig)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((id, policy)) = access.next_entry::<String, PolicyConfig>()? {
                    // A repeated id replaces the earlier rule but keeps its position.
                    match entries.iter_mut().find(|(existing, _)| *existing == id) {
                        Some(slot) => slot.1 = policy,
                        None => entries.push((id, policy)),
                    }
                }
                Ok(PolicyMap(entries))
            }

            fn visit_unit<E>(self) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(PolicyMap::default())
            }
        }

        deserializer.deserialize_map(PolicyMapVisitor)
    }
}

/// A validated, immutable rate limit policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    id: String,
    capacity: u32,
    period_ms: u64,
    paths: Vec<PathPattern>,
    per_principal: bool,
    diff_capacity: Option<u32>,
}

impl Policy {
    /// Validate a configured policy and compile its path patterns.
    pub fn compile(id: &str, config: &PolicyConfig) -> Result<Self> {
        let invalid = |what: &str| TurnstileError::Config(format!("policy '{}': {}", id, what));

        if config.capacity == 0 {
            return Err(invalid("capacity must be at least 1"));
        }
        if config.period_ms == 0 {
            return Err(invalid("period_ms must be at least 1"));
        }
        if config.diff_capacity == Some(0) {
            return Err(invalid("diff_capacity must be at least 1"));
        }

        let paths = config
            .paths
            .iter()
            .map(|p| {
                PathPattern::parse(p).map_err(|e| match e {
                    TurnstileError::Config(msg) => invalid(&msg),
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: id.to_string(),
            capacity: config.capacity,
            period_ms: config.period_ms,
            paths,
            per_principal: config.per_principal,
            diff_capacity: config.diff_capacity,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn per_principal(&self) -> bool {
        self.per_principal
    }

    /// Capacity in effect for a request in the given mode.
    pub fn effective_capacity(&self, diff: bool) -> u32 {
        match (diff, self.diff_capacity) {
            (true, Some(diff_capacity)) => diff_capacity,
            _ => self.capacity,
        }
    }

    /// Whether any of this policy's patterns matches `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.paths.iter().any(|pattern| pattern.matches(path))
    }
}

/// The ordered set of policies consulted for every request.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: Vec<Policy>,
}

impl PolicySet {
    /// Create an empty policy set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every configured policy, preserving declaration order.
    pub fn compile(policies: &PolicyMap) -> Result<Self> {
        let policies = policies
            .iter()
            .map(|(id, config)| Policy::compile(id, config))
            .collect::<Result<Vec<_>>>()?;

        for policy in &policies {
            info!(
                policy = %policy.id,
                capacity = policy.capacity,
                period_ms = policy.period_ms,
                per_principal = policy.per_principal,
                diff_capacity = ?policy.diff_capacity,
                paths = policy.paths.len(),
                "Loaded rate limit policy"
            );
        }

        Ok(Self { policies })
    }

    /// Find the policy governing `path`: the first one, in declaration
    /// order, with a matching pattern.
    pub fn resolve(&self, path: &str) -> Option<&Policy> {
        self.policies.iter().find(|policy| policy.matches(path))
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }
}
