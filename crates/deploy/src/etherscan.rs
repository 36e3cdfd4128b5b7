//! Etherscan-compatible verification API client.

use std::{path::Path, time::Duration};

use alloy_core::primitives::hex;
use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::{SourceVerifier, VerificationError, VerificationRequest, VerifiedConfirmation, rpc};

/// Default interval between two `checkverifystatus` polls.
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of `checkverifystatus` polls before giving up.
pub const DEFAULT_STATUS_POLL_ATTEMPTS: usize = 12;

/// Envelope of every Etherscan API answer.
#[derive(Debug, Clone, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl ApiResponse {
    fn is_ok(&self) -> bool {
        self.status == "1"
    }

    /// The `result` field as text. Error details live there, `message` is
    /// usually just `NOTOK`.
    fn result_text(&self) -> String {
        match &self.result {
            Value::String(text) => text.clone(),
            Value::Null => self.message.clone(),
            other => other.to_string(),
        }
    }
}

/// The parts of a Hardhat build info file the verification API needs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfo {
    solc_long_version: String,
    /// Standard-json compiler input.
    input: Value,
}

fn load_build_info(path: &Path) -> anyhow::Result<BuildInfo> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read build info {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse build info {}", path.display()))
}

/// Map an unsuccessful answer to a verification error.
fn classify_failure(reason: String) -> VerificationError {
    let lowered = reason.to_lowercase();

    if lowered.contains("pending in queue") {
        VerificationError::Pending(reason)
    } else if lowered.contains("already verified") {
        VerificationError::AlreadyVerified
    } else if lowered.contains("unable to locate contractcode") {
        VerificationError::NotYetIndexed(reason)
    } else if lowered.contains("unable to verify") || lowered.contains("constructor argument") {
        VerificationError::ArgumentMismatch(reason)
    } else {
        VerificationError::Rejected(reason)
    }
}

/// Interpret a `verifysourcecode` answer: the submission guid on success.
fn classify_submission(response: ApiResponse) -> Result<String, VerificationError> {
    if response.is_ok() {
        Ok(response.result_text())
    } else {
        Err(classify_failure(response.result_text()))
    }
}

/// Interpret a `checkverifystatus` answer: the final message on success.
fn classify_status(response: ApiResponse) -> Result<String, VerificationError> {
    let text = response.result_text();
    if response.is_ok() {
        // Some explorers report an already verified contract with status 1.
        if text.to_lowercase().contains("already verified") {
            return Err(VerificationError::AlreadyVerified);
        }
        return Ok(text);
    }
    Err(classify_failure(text))
}

/// [`SourceVerifier`] backed by an Etherscan-compatible API.
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    poll_interval: Duration,
    poll_attempts: usize,
}

impl EtherscanClient {
    pub fn new(api_url: Url, api_key: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            api_url,
            api_key: api_key.into(),
            poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
            poll_attempts: DEFAULT_STATUS_POLL_ATTEMPTS,
        })
    }

    /// How often and how many times to ask for the outcome of a submission.
    pub fn with_status_polling(mut self, interval: Duration, attempts: usize) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    async fn send_form(&self, form: &[(&str, &str)]) -> anyhow::Result<ApiResponse> {
        self.client
            .post(self.api_url.clone())
            .form(form)
            .send()
            .await
            .context("Failed to send verification request")?
            .json()
            .await
            .context("Failed to parse verification response")
    }

    async fn check_status(&self, guid: &str) -> Result<String, VerificationError> {
        let response: ApiResponse = self
            .client
            .get(self.api_url.clone())
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("module", "contract"),
                ("action", "checkverifystatus"),
                ("guid", guid),
            ])
            .send()
            .await
            .context("Failed to send verification status request")
            .map_err(|cause| VerificationError::Service { cause })?
            .json()
            .await
            .context("Failed to parse verification status response")
            .map_err(|cause| VerificationError::Service { cause })?;

        classify_status(response)
    }
}

impl SourceVerifier for EtherscanClient {
    async fn submit(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerifiedConfirmation, VerificationError> {
        let contract_name = &request.source.fully_qualified_name;

        let build_info = request
            .source
            .build_info
            .as_deref()
            .ok_or_else(|| VerificationError::MissingSource(contract_name.clone()))?;
        let build_info = load_build_info(build_info)
            .map_err(|e| VerificationError::MissingSource(format!("{contract_name}: {e:#}")))?;

        let source_code = build_info.input.to_string();
        let address = format!("{:#x}", request.address);
        let compiler_version = format!("v{}", build_info.solc_long_version);
        let constructor_args = hex::encode(&request.constructor_args);

        let response = self
            .send_form(&[
                ("apikey", self.api_key.as_str()),
                ("module", "contract"),
                ("action", "verifysourcecode"),
                ("contractaddress", address.as_str()),
                ("sourceCode", source_code.as_str()),
                ("codeformat", "solidity-standard-json-input"),
                ("contractname", contract_name.as_str()),
                ("compilerversion", compiler_version.as_str()),
                // Misspelled in the API itself.
                ("constructorArguements", constructor_args.as_str()),
            ])
            .await
            .map_err(|cause| VerificationError::Service { cause })?;

        let guid = classify_submission(response)?;
        tracing::debug!(%address, %guid, "Verification submitted, polling status...");

        let message = (|| self.check_status(&guid))
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.poll_interval)
                    .with_max_times(self.poll_attempts),
            )
            .sleep(tokio::time::sleep)
            .when(|e| matches!(e, VerificationError::Pending(_)))
            .notify(|_, delay| {
                tracing::trace!(%guid, ?delay, "Verification pending, polling again...");
            })
            .await?;

        Ok(VerifiedConfirmation {
            address: request.address,
            message,
        })
    }
}
