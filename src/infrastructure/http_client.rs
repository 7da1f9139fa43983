//! Shared HTTP transport for the market, news and calendar adapters: a
//! reqwest client wrapped in exponential-backoff retry middleware, with
//! every knob driven by the `http` settings section.

use crate::config::HttpConfig;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;

/// Build the retry-wrapped client for one adapter. AI provider calls must
/// NOT use this; the gateway's fallback chain is their only retry, so they
/// build plain clients with their own hard timeouts.
pub fn retry_client(config: &HttpConfig) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);

    let client = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .user_agent(concat!("tradewarden/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new());

    ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}
