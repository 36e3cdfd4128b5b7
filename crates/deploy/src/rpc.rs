//! Shared utilities for Ethereum JSON-RPC endpoints.

use std::{future::Future, time::Duration};

use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

/// Default timeout for a single HTTP request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result, or an error if the request failed or returned an error response.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Deserialize a u64 from a hex string (with 0x prefix).
///
/// Reads an owned string, so it also works when decoding from a
/// [`serde_json::Value`].
pub fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

/// Returned by [`wait_until`] when the timeout elapses without a value.
#[derive(Debug, Default)]
pub struct WaitTimeout {
    /// The last error reported by the check, if any attempt failed.
    pub last_error: Option<anyhow::Error>,
}

/// Poll `check_fn` until it yields a value or `timeout` elapses.
///
/// `Ok(None)` and errors both mean "not yet": errors are logged and polling
/// continues, so a flaky endpoint does not end the wait early. The last
/// error is handed back on timeout.
pub async fn wait_until<T, F, Fut>(
    name: &str,
    timeout: Duration,
    poll_interval: Duration,
    check_fn: F,
) -> Result<T, WaitTimeout>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>, anyhow::Error>>,
{
    let start = tokio::time::Instant::now();
    let mut last_error = None;

    loop {
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                tracing::trace!(target_name = %name, "Not ready yet, polling again...");
            }
            Err(e) => {
                tracing::warn!(
                    error = %format!("{e:#}"),
                    target_name = %name,
                    "Check failed, retrying..."
                );
                last_error = Some(e);
            }
        }

        if start.elapsed() >= timeout {
            return Err(WaitTimeout { last_error });
        }

        tokio::time::sleep(poll_interval).await;
    }
}
