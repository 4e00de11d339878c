//! Turnstile - HTTP Admission Control
//!
//! This crate implements per-route, per-principal token-bucket rate limiting
//! for an admin HTTP API. Policies are matched against request paths with
//! Ant-style patterns, and each derived key gets its own lazily refilled
//! bucket. State is local to the process; nothing is shared across replicas.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
