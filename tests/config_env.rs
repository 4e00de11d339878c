//! Environment overrides layered over the configuration file.
//!
//! Kept in its own test binary with a single test: the process environment
//! is shared by every test running in the same process.

use std::env;
use std::net::SocketAddr;
use std::path::Path;

use turnstile::config::TurnstileConfig;

const ENABLED_VAR: &str = "TURNSTILE__RATE_LIMIT__ENABLED";
const ADDR_VAR: &str = "TURNSTILE__SERVER__HTTP_ADDR";

/// Removes the override variables when dropped, even if an assertion fails.
struct EnvGuard;

impl Drop for EnvGuard {
    fn drop(&mut self) {
        env::remove_var(ENABLED_VAR);
        env::remove_var(ADDR_VAR);
    }
}

#[test]
fn test_environment_overrides_file_values() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/turnstile.yaml");

    let from_file = TurnstileConfig::load(Some(&path)).unwrap();
    assert!(from_file.rate_limit.enabled);
    assert_eq!(
        from_file.server.http_addr,
        "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
    );

    let _guard = EnvGuard;
    env::set_var(ENABLED_VAR, "false");
    env::set_var(ADDR_VAR, "0.0.0.0:9999");

    let config = TurnstileConfig::load(Some(&path)).unwrap();
    assert!(!config.rate_limit.enabled);
    assert!(!config.rate_limit.is_active());
    assert_eq!(
        config.server.http_addr,
        "0.0.0.0:9999".parse::<SocketAddr>().unwrap()
    );

    let ids: Vec<&str> = config.rate_limit.policies.iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["check-messages", "writes", "admin"]);
}
