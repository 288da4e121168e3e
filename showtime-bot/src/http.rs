//! Shared reqwest client construction for the upstream sources.

use reqwest::Client;
use std::time::Duration;

use crate::error::{BotError, BotResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client with a request deadline of `timeout` and a fixed connect deadline.
pub fn http_client(timeout: Duration) -> BotResult<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .build()
        .map_err(|e| BotError::Config(format!("Failed to build HTTP client: {e}")))
}
