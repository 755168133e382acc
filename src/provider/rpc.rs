use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::{
    error::Error,
    types::{ChainEndpoint, RpcRequest, RpcResponse},
};

#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub backoff: Duration,
}

/// JSON-RPC client for one configured endpoint. Shared by every
/// indexer on the chain; the call budget and retry policy are
/// internal. Callers over the per-minute budget wait for a slot
/// instead of failing.
pub struct Rpc {
    client: reqwest::Client,
    endpoint: ChainEndpoint,
    settings: RpcSettings,
    limiter: DefaultDirectRateLimiter,
}

impl std::fmt::Debug for Rpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rpc")
            .field("endpoint", &self.endpoint)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

enum SendFailure {
    Transient(String),
    Protocol(String),
}

impl Rpc {
    pub fn new(
        endpoint: ChainEndpoint,
        settings: RpcSettings,
    ) -> Result<Rpc, Error> {
        let client = reqwest::Client::builder().build()?;
        let per_minute = NonZeroU32::new(endpoint.calls_per_minute)
            .unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        Ok(Rpc {
            client,
            endpoint,
            settings,
            limiter,
        })
    }

    pub fn chain(&self) -> &str {
        &self.endpoint.name
    }

    pub async fn call(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, Error> {
        let request = RpcRequest::new(1, method, params);
        let body = self.send(serde_json::to_value(&request)?).await?;
        let response: RpcResponse =
            serde_json::from_value(body).map_err(|e| {
                Error::ProviderProtocolError(format!(
                    "{}: malformed response to {}: {}",
                    self.endpoint.name, method, e
                ))
            })?;

        unpack(&self.endpoint.name, response)
    }

    /// Sends a pre-built batch as a single underlying call. Per-request
    /// success/failure is preserved in the returned responses.
    pub async fn call_batch(
        &self,
        requests: &[RpcRequest],
    ) -> Result<Vec<RpcResponse>, Error> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let body = self.send(serde_json::to_value(requests)?).await?;
        serde_json::from_value(body).map_err(|e| {
            Error::ProviderProtocolError(format!(
                "{}: malformed batch response: {}",
                self.endpoint.name, e
            ))
        })
    }

    async fn send(&self, payload: Value) -> Result<Value, Error> {
        let mut attempt: u32 = 0;

        loop {
            self.limiter.until_ready().await;

            match self.send_once(&payload).await {
                Ok(value) => return Ok(value),
                Err(SendFailure::Protocol(message)) => {
                    // Retrying cannot fix a decoding mismatch.
                    return Err(Error::ProviderProtocolError(format!(
                        "{}: {}",
                        self.endpoint.name, message
                    )));
                },
                Err(SendFailure::Transient(message)) => {
                    attempt += 1;

                    if attempt >= self.settings.retry_attempts.max(1) {
                        return Err(Error::ProviderUnavailable(format!(
                            "{}: {} (after {} attempts)",
                            self.endpoint.name, message, attempt
                        )));
                    }

                    // Exponent capped so a long retry budget cannot
                    // overflow the multiplier.
                    let backoff =
                        self.settings.backoff * 2u32.pow((attempt - 1).min(16));
                    warn!(
                        chain = %self.endpoint.name,
                        attempt,
                        "provider call failed, retrying in {:?}: {}",
                        backoff,
                        message
                    );
                    sleep(backoff).await;
                },
            }
        }
    }

    async fn send_once(&self, payload: &Value) -> Result<Value, SendFailure> {
        let request = self.client.post(&self.endpoint.url).json(payload);

        let response = match timeout(self.settings.timeout, request.send())
            .await
        {
            Err(_) => return Err(SendFailure::Transient("timed out".into())),
            Ok(Err(e)) => return Err(SendFailure::Transient(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();

        if status.is_server_error() || status.as_u16() == 429 {
            return Err(SendFailure::Transient(format!("status {}", status)));
        }

        if !status.is_success() {
            return Err(SendFailure::Protocol(format!("status {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SendFailure::Protocol(format!("invalid JSON: {}", e)))
    }
}

fn unpack(chain: &str, response: RpcResponse) -> Result<Value, Error> {
    if let Some(error) = response.error {
        return Err(Error::ProviderProtocolError(format!(
            "{}: rpc error {}: {}",
            chain, error.code, error.message
        )));
    }

    response.result.ok_or_else(|| {
        Error::ProviderProtocolError(format!("{}: response without result", chain))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint(url: &str) -> ChainEndpoint {
        ChainEndpoint {
            name: "testnet".to_owned(),
            url: url.to_owned(),
            calls_per_minute: 600,
            max_batch_size: 10,
        }
    }

    fn settings() -> RpcSettings {
        RpcSettings {
            timeout: Duration::from_secs(5),
            retry_attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_call_returns_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "result": "0x10"
            })))
            .mount(&server)
            .await;

        let rpc = Rpc::new(endpoint(&server.uri()), settings()).unwrap();
        let result = rpc.call("eth_blockNumber", json!([])).await.unwrap();
        assert_eq!(result, json!("0x10"));
    }

    #[tokio::test]
    async fn test_backoff_terminates_after_attempt_bound() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let rpc = Rpc::new(endpoint(&server.uri()), settings()).unwrap();
        let result = rpc.call("eth_blockNumber", json!([])).await;

        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_response_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("not json"),
            )
            .mount(&server)
            .await;

        let rpc = Rpc::new(endpoint(&server.uri()), settings()).unwrap();
        let result = rpc.call("eth_blockNumber", json!([])).await;

        assert!(matches!(result, Err(Error::ProviderProtocolError(_))));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rpc_error_body_is_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": -32601, "message": "method not found"}
            })))
            .mount(&server)
            .await;

        let rpc = Rpc::new(endpoint(&server.uri()), settings()).unwrap();
        let result = rpc.call("eth_unknown", json!([])).await;

        assert!(matches!(result, Err(Error::ProviderProtocolError(_))));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backoff_multiplier_capped_over_long_retry_budgets() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let rpc = Rpc::new(
            endpoint(&server.uri()),
            RpcSettings {
                timeout: Duration::from_secs(5),
                retry_attempts: 40,
                backoff: Duration::ZERO,
            },
        )
        .unwrap();
        let result = rpc.call("eth_blockNumber", json!([])).await;

        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
        assert_eq!(server.received_requests().await.unwrap().len(), 40);
    }
}
