//! Shared fixtures for the `workdag` integration tests: config builders,
//! scripted collaborators and a harness wiring them to an in-memory store.

pub mod builders;
pub mod fakes;
pub mod harness;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static TRACING: Once = Once::new();

/// Upper bound on any single awaited operation in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-writer subscriber once per test binary.
///
/// Output is captured per test and only shown for failures. `RUST_LOG`
/// overrides the default `workdag=info` filter, e.g.
/// `RUST_LOG=workdag::recovery=trace`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("workdag=info,warn"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, failing the test if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("test operation did not finish within {TEST_TIMEOUT:?}"),
    }
}
