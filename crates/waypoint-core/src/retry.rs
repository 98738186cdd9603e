//! Bounded retry over the round-robin balancer.
//!
//! Retries at most once (two attempts total), and only when the prior
//! attempt's response was not yet committed and the failure was classified
//! as a network error. The next attempt's server comes from the balancer,
//! which naturally avoids the failed one in steady state.

use crate::balancer::ServerList;
use crate::error::ForwardError;
use log::debug;
use std::future::Future;

const MAX_ATTEMPTS: u32 = 2;

/// Default retry predicate: only uncommitted, network-classified failures.
fn is_retryable(error: &ForwardError) -> bool {
    error.is_uncommitted() && error.is_network()
}

/// Runs `attempt` against successive servers from `servers`, retrying once
/// on an uncommitted network error. `attempt` receives the chosen backend
/// and the 1-based attempt number. Returns the last error verbatim (not
/// converted to a gateway error) so the circuit breaker wrapping this call
/// can still classify it.
pub async fn with_retry<F, Fut, T>(servers: &ServerList, attempt: F) -> Result<T, ForwardError>
where
    F: FnMut(url::Url, u32) -> Fut,
    Fut: Future<Output = Result<T, ForwardError>>,
{
    with_retry_if(servers, is_retryable, attempt).await
}

/// Same as [`with_retry`], but with the retry classification left to the
/// caller instead of the network-error default, e.g. to opt into treating
/// certain upstream statuses as retryable without changing the loop itself.
pub async fn with_retry_if<F, Fut, T>(
    servers: &ServerList,
    should_retry: impl Fn(&ForwardError) -> bool,
    mut attempt: F,
) -> Result<T, ForwardError>
where
    F: FnMut(url::Url, u32) -> Fut,
    Fut: Future<Output = Result<T, ForwardError>>,
{
    let mut last_error = ForwardError::Connect("no live backends".to_string());
    for attempt_no in 1..=MAX_ATTEMPTS {
        let Some(backend) = servers.pick() else {
            return Err(last_error);
        };

        match attempt(backend, attempt_no).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retryable = should_retry(&error) && attempt_no < MAX_ATTEMPTS;
                last_error = error;
                if retryable {
                    debug!("attempt {} failed, retrying", attempt_no);
                    continue;
                }
                return Err(last_error);
            }
        }
    }

    Err(last_error)
}
