//! Health and port probes for the backend server.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// Per-probe HTTP timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval for the port-release wait.
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Probe the server's base URL once. Alive means any response with
/// status 200 or 404: sd-server answers 404 on `/`, while a connection
/// error or an unexpected status means some other service or no service.
///
/// Takes no supervisor lock; callers may probe while another task
/// mutates process state.
pub async fn check_health(client: &reqwest::Client, base_url: &str) -> bool {
    let url = format!("{base_url}/");
    match client.get(&url).timeout(PROBE_TIMEOUT).send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            matches!(status, 200 | 404)
        }
        Err(e) => {
            debug!(url = %url, error = %e, "health probe failed");
            false
        }
    }
}

/// Wait for a TCP port to become free.
///
/// Returns `true` once nothing accepts connections on `host:port`,
/// `false` if the port is still occupied when `wait` elapses.
pub async fn wait_for_port_release(host: &str, port: u16, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        let occupied = matches!(
            timeout(PORT_POLL_INTERVAL, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        );
        if !occupied {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(PORT_POLL_INTERVAL).await;
    }
}
