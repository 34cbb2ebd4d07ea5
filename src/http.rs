//! Shared HTTP client construction.
//!
//! Every provider call goes through one client built once and reused, so
//! connection pooling actually helps across requests. Settings mirror the
//! teacher's `http_client.rs`: a generous overall timeout since streaming
//! responses can legitimately run for minutes, a short idle-pool timeout so
//! we don't hold a connection open to a host we rarely hit, and
//! `tcp_nodelay` so the first bytes of a streamed response aren't delayed
//! by Nagle's algorithm.

use std::time::Duration;

/// Build the client used for all outbound provider requests. Hyper's
/// connection pool caches DNS resolution for the lifetime of a pooled
/// connection; the 5s idle timeout keeps that window short enough that a
/// provider's DNS failover is noticed promptly rather than being masked by
/// a long-lived idle connection.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    default_builder().build()
}

fn default_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(5))
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(60))
        .gzip(true)
        .default_headers({
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(reqwest::header::CONNECTION, reqwest::header::HeaderValue::from_static("keep-alive"));
            headers
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_without_error() {
        assert!(build_client().is_ok());
    }
}
