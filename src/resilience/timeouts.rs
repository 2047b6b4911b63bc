//! Timeout enforcement.
//!
//! Upstream exchanges run inside a fixed window. A timed-out request maps to
//! `ProxyError::UpstreamTimeout`, which the client sees as 504.

use std::future::Future;
use std::time::Duration;

use crate::discovery::UpstreamTarget;
use crate::error::ProxyError;

/// Run `exchange` within `window`, dropping it if the window elapses.
pub async fn with_response_timeout<F, T>(
    window: Duration,
    target: &UpstreamTarget,
    exchange: F,
) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    match tokio::time::timeout(window, exchange).await {
        Ok(result) => result,
        Err(_) => Err(ProxyError::UpstreamTimeout {
            target: target.to_string(),
            timeout: window,
        }),
    }
}
