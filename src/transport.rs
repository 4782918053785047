//! HTTP transport with bounded retries and jittered backoff.
//!
//! Every outbound call in the crate goes through [`Transport::execute`].
//! Only a fixed set of transient status codes is retried; anything else
//! is handed straight back so the protocol layers can interpret it.

use std::time::Duration;

use rand::Rng;

use crate::errors::Result;

/// Retry budget for everything except the directory fetch.
pub(crate) const DEFAULT_RETRIES: usize = 3;

/// The directory fetch is the first contact with a provider and gates
/// the whole attempt, so it gets a larger budget.
pub(crate) const DIRECTORY_RETRIES: usize = 6;

const TRANSIENT_STATUS: [u16; 10] = [408, 425, 429, 500, 502, 503, 504, 522, 524, 525];

const BACKOFF_MS: [u64; 7] = [250, 1000, 2500, 4000, 6000, 9000, 12000];
const JITTER_MS: u64 = 200;

pub(crate) fn is_transient(status: u16) -> bool {
    TRANSIENT_STATUS.contains(&status)
}

fn backoff_base_ms(attempt: usize) -> u64 {
    BACKOFF_MS[attempt.min(BACKOFF_MS.len() - 1)]
}

fn backoff_delay(attempt: usize) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
    Duration::from_millis(backoff_base_ms(attempt) + jitter)
}

/// A [`reqwest::Client`] wrapper applying the retry policy.
#[derive(Debug, Clone)]
pub(crate) struct Transport {
    client: reqwest::Client,
}

impl Transport {
    pub(crate) fn new(client: reqwest::Client) -> Self {
        Transport { client }
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Execute `request`, retrying transient failures up to
    /// `max_retries` additional times.
    ///
    /// A response with a non-transient status is returned as-is, success
    /// or not. When the retry budget runs out the last transient
    /// response (or I/O error) is returned for the caller to interpret.
    pub(crate) async fn execute(
        &self,
        request: reqwest::Request,
        max_retries: usize,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0usize;
        loop {
            let current = match request.try_clone() {
                Some(clone) => clone,
                // Streaming bodies cannot be replayed; send them once.
                None => return Ok(self.client.execute(request).await?),
            };

            match self.client.execute(current).await {
                Ok(response) if !is_transient(response.status().as_u16()) => {
                    return Ok(response);
                }
                Ok(response) => {
                    if attempt >= max_retries {
                        return Ok(response);
                    }
                    tracing::debug!(
                        status = response.status().as_u16(),
                        attempt,
                        url = %request.url(),
                        "transient response, retrying"
                    );
                }
                Err(error) => {
                    if attempt >= max_retries {
                        return Err(error.into());
                    }
                    tracing::debug!(%error, attempt, url = %request.url(), "request failed, retrying");
                }
            }

            tokio::time::sleep(backoff_delay(attempt)).await;
            attempt += 1;
        }
    }
}
