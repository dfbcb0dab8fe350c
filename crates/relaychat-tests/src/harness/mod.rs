pub mod client;
pub mod node;
pub mod peer;

use std::path::Path;
use std::time::Duration;

/// How long a scenario waits for something that should happen.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or `timeout` elapses. Returns the final result.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Read every record in a chat log. A missing file reads as empty.
pub fn read_log(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Poll a chat log until it holds at least `count` records, or timeout.
pub async fn poll_log_until(
    path: &Path,
    count: usize,
    timeout: Duration,
) -> Vec<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let records = read_log(path);
        if records.len() >= count || tokio::time::Instant::now() >= deadline {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Initialize tracing for tests (only once per process).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("relaychat=debug,relaychat_node=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}
