//! HTTP surface: admission middleware, admin routes and the server.

pub mod middleware;
pub mod routes;
mod server;

pub use middleware::{apply, describe, layer, rate_limit_middleware};
pub use server::HttpServer;
