use std::time::Duration;

use tracing::{info, warn};

use crate::tls::TrustPolicy;
use crate::types::TestResult;

/// Checks that the receiver's HTTPS endpoint answers at all. Any HTTP
/// response counts; only transport failures and the timeout do not.
pub async fn check_trust_page(url: &str, trust: &TrustPolicy, timeout: Duration) -> TestResult {
    info!(%url, "testing connectivity");
    let client = match reqwest::Client::builder()
        .timeout(timeout)
        // Pins are enforced on the signaling socket; this only checks reachability.
        .danger_accept_invalid_certs(!trust.verifies_chain())
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            return TestResult::Failure {
                url: url.to_string(),
                reason: format!("could not build HTTP client: {e}"),
            }
        }
    };

    match client.get(url).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            info!(%url, status, "connectivity test succeeded");
            TestResult::Success {
                url: url.to_string(),
                status,
            }
        }
        Err(e) => {
            let reason = if e.is_timeout() {
                format!("no response within {} s", timeout.as_secs_f32())
            } else if e.is_connect() {
                format!("connection failed ({})", root_cause(&e))
            } else {
                root_cause(&e)
            };
            warn!(%url, "connectivity test failed: {}", reason);
            TestResult::Failure {
                url: url.to_string(),
                reason,
            }
        }
    }
}

fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection_is_a_failure() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{port}");
        let result = check_trust_page(&url, &TrustPolicy::SystemRoots, Duration::from_secs(5)).await;
        match result {
            TestResult::Failure { url: failed, .. } => assert_eq!(failed, url),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accepts the TCP connection but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let url = format!("http://{addr}");
        let result = check_trust_page(&url, &TrustPolicy::SystemRoots, Duration::from_millis(300)).await;
        match result {
            TestResult::Failure { reason, .. } => assert!(reason.contains("no response")),
            other => panic!("unexpected result {other:?}"),
        }
        hold.abort();
    }
}
