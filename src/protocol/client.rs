//! Client for sending HTTP requests to an ACME server.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::key::KeyPair;
use crate::schema::challenges::ChallengeReadyRequest;
use crate::schema::{
    Authorization, AuthorizationStatus, Directory, FinalizeOrder, Identifier, NewOrderRequest,
    Order, OrderStatus,
};
use crate::transport::{Transport, DEFAULT_RETRIES, DIRECTORY_RETRIES};

use super::jose::{Nonce, ProtectedHeader, UnsignedToken};
use super::Url;

const NONCE_HEADER: &str = "Replay-Nonce";
const CONTENT_JOSE: &str = "application/jose+json";
const CONTENT_PEM_CHAIN: &str = "application/pem-certificate-chain";

/// Error bodies are truncated to this length before being carried in an
/// error value.
const BODY_LIMIT: usize = 2000;

const POLL_INITIAL_DELAY: Duration = Duration::from_secs(2);
const POLL_BACKOFF_FACTOR: f64 = 1.7;
const POLL_MAX_DELAY: Duration = Duration::from_secs(10);
const POLL_MAX_ATTEMPTS: usize = 12;
const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(120);
const ORDER_TIMEOUT: Duration = Duration::from_secs(180);

/// ACME HTTP client.
///
/// The client tracks the state one signed-request sequence needs: the
/// directory fetched from the provider (kept for the client's lifetime)
/// and the current anti-replay [`Nonce`]. Each issuance attempt owns its
/// own client; the nonce cache is deliberately not shared across
/// providers or concurrent issuances.
#[derive(Debug)]
pub struct AcmeClient {
    transport: Transport,
    directory_url: Url,
    directory: Option<Directory>,
    nonce: Option<Nonce>,
}

impl AcmeClient {
    /// Create a client for the provider behind `directory_url`.
    pub fn new(client: reqwest::Client, directory_url: Url) -> Self {
        AcmeClient {
            transport: Transport::new(client),
            directory_url,
            directory: None,
            nonce: None,
        }
    }

    /// Fetch the provider directory, caching it for this client's
    /// lifetime.
    pub async fn directory(&mut self) -> Result<Directory> {
        if let Some(directory) = &self.directory {
            return Ok(directory.clone());
        }

        let request = self
            .transport
            .client()
            .get(self.directory_url.as_str())
            .header(http::header::ACCEPT, "application/json")
            .build()?;
        let response = self.transport.execute(request, DIRECTORY_RETRIES).await?;
        if !response.status().is_success() {
            return Err(request_failed(&self.directory_url, response).await);
        }

        let directory: Directory = response.json().await?;
        self.directory = Some(directory.clone());
        Ok(directory)
    }

    /// Submit a POST-AS-GET request (signed POST with the empty-string
    /// payload) to `url`.
    pub async fn post_as_get(&mut self, url: &Url, key: &KeyPair, kid: &str) -> Result<AcmeResponse> {
        self.execute_signed::<()>(url, key, Some(kid), None, None)
            .await
    }

    /// Submit a signed POST with a JSON payload to `url`.
    ///
    /// `kid` identifies a registered account; pass `None` only for
    /// `newAccount`, where the public JWK is embedded instead.
    pub async fn post<P: Serialize>(
        &mut self,
        url: &Url,
        key: &KeyPair,
        kid: Option<&str>,
        payload: &P,
    ) -> Result<AcmeResponse> {
        self.execute_signed(url, key, kid, Some(payload), None).await
    }

    /// Create a new order for `identifiers`, returning the order and its
    /// location URL.
    pub async fn new_order(
        &mut self,
        key: &KeyPair,
        kid: &str,
        identifiers: Vec<Identifier>,
    ) -> Result<(Order, Url)> {
        let directory = self.directory().await?;
        let payload = NewOrderRequest { identifiers };
        let response = self
            .post(&directory.new_order, key, Some(kid), &payload)
            .await?;
        let order_url = response
            .location()
            .ok_or_else(|| Error::protocol("newOrder response is missing the Location header"))?;
        Ok((response.json()?, order_url))
    }

    /// Fetch an authorization resource.
    pub async fn authorization(
        &mut self,
        key: &KeyPair,
        kid: &str,
        url: &Url,
    ) -> Result<Authorization> {
        self.post_as_get(url, key, kid).await?.json()
    }

    /// Notify the server that a challenge is ready for validation.
    ///
    /// This is a POST of the empty JSON object, not POST-AS-GET.
    pub async fn respond_to_challenge(&mut self, key: &KeyPair, kid: &str, url: &Url) -> Result<()> {
        self.post(url, key, Some(kid), &ChallengeReadyRequest).await?;
        Ok(())
    }

    /// Poll an authorization until it becomes `valid`.
    ///
    /// Any other terminal status fails the attempt immediately; running
    /// out of attempts or wall-clock budget is [`Error::AcmePollExceeded`].
    pub async fn poll_authorization(
        &mut self,
        key: &KeyPair,
        kid: &str,
        url: &Url,
    ) -> Result<Authorization> {
        let started = tokio::time::Instant::now();
        let mut delay = POLL_INITIAL_DELAY;

        for _ in 0..POLL_MAX_ATTEMPTS {
            let response = self.post_as_get(url, key, kid).await?;
            let retry_after = response.retry_after();
            let authorization: Authorization = response.json()?;

            match authorization.status {
                AuthorizationStatus::Valid => return Ok(authorization),
                status if status.is_finished() => {
                    let detail = authorization
                        .dns01_challenge()
                        .and_then(|challenge| challenge.error())
                        .map(|error| error.to_string())
                        .unwrap_or_else(|| format!("status {status:?}"));
                    return Err(Error::AuthorizationFailed {
                        identifier: authorization.identifier.value().to_owned(),
                        detail,
                    });
                }
                status => {
                    tracing::trace!(?status, url = %url, "authorization not finished");
                }
            }

            delay = honor_retry_after(delay, retry_after);
            if started.elapsed() + delay > AUTHORIZATION_TIMEOUT {
                break;
            }
            tokio::time::sleep(delay).await;
            delay = next_poll_delay(delay);
        }

        Err(Error::AcmePollExceeded {
            resource: "authorization",
            waited_secs: started.elapsed().as_secs(),
        })
    }

    /// Submit the CSR to the order's finalize URL.
    pub async fn finalize_order(
        &mut self,
        key: &KeyPair,
        kid: &str,
        finalize_url: &Url,
        csr_der: Vec<u8>,
    ) -> Result<Order> {
        let payload = FinalizeOrder::new(csr_der);
        self.post(finalize_url, key, Some(kid), &payload).await?.json()
    }

    /// Poll an order until it becomes `valid` (certificate issued).
    pub async fn poll_order(&mut self, key: &KeyPair, kid: &str, order_url: &Url) -> Result<Order> {
        let started = tokio::time::Instant::now();
        let mut delay = POLL_INITIAL_DELAY;

        for _ in 0..POLL_MAX_ATTEMPTS {
            let response = self.post_as_get(order_url, key, kid).await?;
            let retry_after = response.retry_after();
            let order: Order = response.json()?;

            match order.status {
                OrderStatus::Valid => return Ok(order),
                OrderStatus::Invalid => {
                    let detail = order
                        .error
                        .map(|error| error.to_string())
                        .unwrap_or_else(|| "order became invalid".to_owned());
                    return Err(Error::OrderFailed { detail });
                }
                status => {
                    tracing::trace!(?status, url = %order_url, "order not finished");
                }
            }

            delay = honor_retry_after(delay, retry_after);
            if started.elapsed() + delay > ORDER_TIMEOUT {
                break;
            }
            tokio::time::sleep(delay).await;
            delay = next_poll_delay(delay);
        }

        Err(Error::AcmePollExceeded {
            resource: "order",
            waited_secs: started.elapsed().as_secs(),
        })
    }

    /// Download the issued certificate chain as PEM text.
    pub async fn download_certificate(
        &mut self,
        key: &KeyPair,
        kid: &str,
        certificate_url: &Url,
    ) -> Result<String> {
        let response = self
            .execute_signed::<()>(certificate_url, key, Some(kid), None, Some(CONTENT_PEM_CHAIN))
            .await?;
        response.text()
    }

    async fn execute_signed<P: Serialize>(
        &mut self,
        url: &Url,
        key: &KeyPair,
        kid: Option<&str>,
        payload: Option<&P>,
        accept: Option<&'static str>,
    ) -> Result<AcmeResponse> {
        let directory = self.directory().await?;
        let mut nonce = self.take_nonce(&directory.new_nonce).await?;

        loop {
            let header = match kid {
                Some(kid) => ProtectedHeader::account(kid, url.clone(), nonce),
                None => ProtectedHeader::embedded_jwk(key, url.clone(), nonce),
            };
            let body = match payload {
                Some(payload) => serde_json::to_vec(&UnsignedToken::post(header, payload).sign(key)?)?,
                None => serde_json::to_vec(&UnsignedToken::get(header).sign(key)?)?,
            };

            let mut builder = self
                .transport
                .client()
                .post(url.as_str())
                .header(http::header::CONTENT_TYPE, CONTENT_JOSE)
                .body(body);
            if let Some(accept) = accept {
                builder = builder.header(http::header::ACCEPT, accept);
            }
            let request = builder.build()?;

            let response = self.transport.execute(request, DEFAULT_RETRIES).await?;
            self.record_nonce(response.headers());

            if response.status().is_success() {
                return AcmeResponse::read(response).await;
            }

            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            if is_bad_nonce(&body) {
                tracing::trace!(url = %url, "server rejected the nonce, retrying with a fresh one");
                nonce = self.take_nonce(&directory.new_nonce).await?;
                continue;
            }

            if let Ok(problem) = serde_json::from_str::<ProblemDocument>(&body) {
                tracing::debug!(kind = %problem.kind, detail = %problem.detail, url = %url, "ACME problem document");
            }

            return Err(Error::AcmeRequestFailed {
                status,
                url: url.to_string(),
                body: truncate(body),
            });
        }
    }

    async fn take_nonce(&mut self, new_nonce_url: &Url) -> Result<Nonce> {
        if let Some(nonce) = self.nonce.take() {
            return Ok(nonce);
        }

        tracing::debug!("requesting a new nonce");
        let request = self
            .transport
            .client()
            .head(new_nonce_url.as_str())
            .build()?;
        let response = self.transport.execute(request, DEFAULT_RETRIES).await?;
        if !response.status().is_success() {
            return Err(request_failed(new_nonce_url, response).await);
        }

        extract_nonce(response.headers())
            .ok_or_else(|| Error::protocol("Replay-Nonce header missing from newNonce response"))
    }

    fn record_nonce(&mut self, headers: &HeaderMap) {
        if let Some(nonce) = extract_nonce(headers) {
            self.nonce = Some(nonce);
        }
    }
}

/// A response from an ACME server: status, headers, and the raw body.
#[derive(Debug)]
pub struct AcmeResponse {
    status: reqwest::StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl AcmeResponse {
    async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(AcmeResponse {
            status,
            headers,
            body,
        })
    }

    /// Response status code.
    pub fn status(&self) -> reqwest::StatusCode {
        self.status
    }

    /// The URL from the `Location` HTTP header, if present and valid.
    pub fn location(&self) -> Option<Url> {
        self.headers
            .get(http::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
    }

    /// The seconds to wait for a retry, from now.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(http::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                if value.contains("GMT") {
                    DateTime::parse_from_rfc2822(value)
                        .map(|when| when.signed_duration_since(Utc::now()))
                        .ok()
                        .and_then(|delta| delta.to_std().ok())
                } else {
                    value.parse::<u64>().ok().map(Duration::from_secs)
                }
            })
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The body as UTF-8 text (certificate chains arrive as
    /// `application/pem-certificate-chain`).
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.clone())
            .map_err(|_| Error::protocol("response body is not valid UTF-8"))
    }
}

/// RFC 7807 problem document returned by ACME servers on error.
#[derive(Debug, Deserialize)]
struct ProblemDocument {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    detail: String,
}

fn is_bad_nonce(body: &str) -> bool {
    serde_json::from_str::<ProblemDocument>(body)
        .map(|problem| problem.kind == "urn:ietf:params:acme:error:badNonce")
        .unwrap_or(false)
}

fn extract_nonce(headers: &HeaderMap) -> Option<Nonce> {
    headers
        .get(NONCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| Nonce::from(value.to_owned()))
}

fn truncate(mut body: String) -> String {
    if body.len() > BODY_LIMIT {
        let mut cut = BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

fn next_poll_delay(delay: Duration) -> Duration {
    let next = delay.as_secs_f64() * POLL_BACKOFF_FACTOR;
    Duration::from_secs_f64(next.min(POLL_MAX_DELAY.as_secs_f64()))
}

fn honor_retry_after(delay: Duration, retry_after: Option<Duration>) -> Duration {
    match retry_after {
        Some(requested) if requested > delay => requested.min(POLL_MAX_DELAY),
        _ => delay,
    }
}

async fn request_failed(url: &Url, response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::AcmeRequestFailed {
        status,
        url: url.to_string(),
        body: truncate(body),
    }
}
