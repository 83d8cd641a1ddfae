//! Readiness probe for a freshly launched engine.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn status_url(port: u16) -> String {
    format!("http://localhost:{port}/system/status")
}

/// Poll the engine status endpoint on `port` until it answers with a success
/// status or `timeout` passes. Returns whether the engine came up.
pub async fn wait_until_up(port: u16, timeout: Duration) -> bool {
    let up = poll(&status_url(port), timeout).await;
    if up {
        info!("mock engine up and running at http://localhost:{port}");
    } else {
        warn!(
            "mock engine not reachable on port {port} after {}s",
            timeout.as_secs()
        );
    }
    up
}

pub(crate) async fn poll(url: &str, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(POLL_INTERVAL.max(Duration::from_secs(2)))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("cannot build readiness probe client: {e}");
            return false;
        }
    };

    let deadline = Instant::now() + timeout;
    loop {
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => return true,
            Ok(response) => debug!("engine status returned {}", response.status()),
            Err(e) => debug!("engine not ready yet: {e}"),
        }
        if Instant::now() + POLL_INTERVAL > deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
