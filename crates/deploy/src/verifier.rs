//! Source verification of deployed contracts.
//!
//! Verification is best-effort: every failure is logged and turned into a
//! [`VerificationOutcome`], never into an error that stops the run.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use serde::Serialize;
use tokio::sync::watch;

use crate::{ContractRole, DeployedContract, SourceRef};

/// Default pause between a deployment and its verification submission,
/// giving the explorer time to index the new contract.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(60);

/// Everything a verification service needs to match a contract to its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRequest {
    pub artifact: String,
    pub role: ContractRole,
    pub address: Address,
    /// ABI-encoded constructor arguments.
    pub constructor_args: Bytes,
    pub source: SourceRef,
}

impl From<&DeployedContract> for VerificationRequest {
    fn from(contract: &DeployedContract) -> Self {
        Self {
            artifact: contract.artifact.clone(),
            role: contract.role,
            address: contract.address,
            constructor_args: contract.constructor_args.clone(),
            source: contract.source.clone(),
        }
    }
}

/// Acknowledgement of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedConfirmation {
    pub address: Address,
    /// Service-side message, e.g. `Pass - Verified`.
    pub message: String,
}

/// Failures reported by a verification service.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("contract source is already verified")]
    AlreadyVerified,
    /// The service has not indexed the contract yet.
    #[error("contract not yet indexed: {0}")]
    NotYetIndexed(String),
    /// The submitted source or constructor arguments do not reproduce the bytecode.
    #[error("source or constructor arguments do not match: {0}")]
    ArgumentMismatch(String),
    /// The service still had the submission queued when polling gave up.
    #[error("verification still pending: {0}")]
    Pending(String),
    #[error("verification rejected: {0}")]
    Rejected(String),
    /// No compiler input is available for the contract.
    #[error("no verifiable source for `{0}`")]
    MissingSource(String),
    /// Transport or decoding failure while talking to the service.
    #[error("verification service error: {cause:#}")]
    Service { cause: anyhow::Error },
}

/// Capability to submit a contract for source verification.
pub trait SourceVerifier: Send + Sync {
    /// Submit the contract once and report the service's verdict.
    fn submit(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = Result<VerifiedConfirmation, VerificationError>> + Send;
}

/// Result of verifying one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, strum::AsRefStr)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
    NotYetIndexed(String),
    ArgumentMismatch(String),
    Pending(String),
    Failed(String),
    /// The run was cancelled during the settle wait.
    Cancelled,
    /// Verification was turned off for the step or the run.
    Skipped,
}

impl VerificationOutcome {
    /// Verified now or previously.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Verified | Self::AlreadyVerified)
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::NotYetIndexed(detail)
            | Self::ArgumentMismatch(detail)
            | Self::Pending(detail)
            | Self::Failed(detail) => Some(detail),
            Self::Verified | Self::AlreadyVerified | Self::Cancelled | Self::Skipped => None,
        }
    }
}

/// Waits for the network to settle, then submits a contract for verification.
#[derive(Debug, Clone)]
pub struct Verifier<V> {
    backend: V,
    settle_delay: Duration,
    cancel: Option<watch::Receiver<bool>>,
}

impl<V: SourceVerifier> Verifier<V> {
    pub fn new(backend: V) -> Self {
        Self {
            backend,
            settle_delay: DEFAULT_SETTLE_DELAY,
            cancel: None,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Abort the settle wait as soon as the receiver observes `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn backend(&self) -> &V {
        &self.backend
    }

    /// Verify one contract. Never fails: problems are logged and classified.
    pub async fn verify(&self, request: &VerificationRequest) -> VerificationOutcome {
        if !self.settle(request).await {
            tracing::warn!(
                artifact = %request.artifact,
                address = %request.address,
                "Verification cancelled before submission"
            );
            return VerificationOutcome::Cancelled;
        }

        tracing::info!(
            artifact = %request.artifact,
            role = %request.role,
            address = %request.address,
            contract = %request.source.fully_qualified_name,
            "Submitting contract for verification..."
        );

        match self.backend.submit(request).await {
            Ok(confirmation) => {
                tracing::info!(
                    artifact = %request.artifact,
                    address = %confirmation.address,
                    message = %confirmation.message,
                    "Contract verified"
                );
                VerificationOutcome::Verified
            }
            Err(VerificationError::AlreadyVerified) => {
                tracing::info!(
                    artifact = %request.artifact,
                    address = %request.address,
                    "Contract already verified"
                );
                VerificationOutcome::AlreadyVerified
            }
            Err(VerificationError::NotYetIndexed(detail)) => {
                tracing::warn!(
                    artifact = %request.artifact,
                    address = %request.address,
                    %detail,
                    "Contract not indexed yet, verify it manually later"
                );
                VerificationOutcome::NotYetIndexed(detail)
            }
            Err(VerificationError::Pending(detail)) => {
                tracing::warn!(
                    artifact = %request.artifact,
                    address = %request.address,
                    %detail,
                    "Verification still pending, check the explorer later"
                );
                VerificationOutcome::Pending(detail)
            }
            Err(VerificationError::ArgumentMismatch(detail)) => {
                tracing::error!(
                    artifact = %request.artifact,
                    address = %request.address,
                    constructor_args = %request.constructor_args,
                    %detail,
                    "Verification failed, source or constructor arguments do not match"
                );
                VerificationOutcome::ArgumentMismatch(detail)
            }
            Err(e) => {
                tracing::error!(
                    artifact = %request.artifact,
                    address = %request.address,
                    error = %e,
                    "Verification failed"
                );
                VerificationOutcome::Failed(e.to_string())
            }
        }
    }

    /// Sleep for the settle delay. Returns `false` if cancelled meanwhile.
    async fn settle(&self, request: &VerificationRequest) -> bool {
        let mut cancel = self.cancel.clone();

        if cancel.as_ref().is_some_and(|cancel| *cancel.borrow()) {
            return false;
        }

        if self.settle_delay.is_zero() {
            return true;
        }

        tracing::info!(
            artifact = %request.artifact,
            address = %request.address,
            delay = ?self.settle_delay,
            "Waiting for the explorer to index the contract..."
        );

        let Some(cancel) = cancel.as_mut() else {
            tokio::time::sleep(self.settle_delay).await;
            return true;
        };

        tokio::select! {
            _ = tokio::time::sleep(self.settle_delay) => true,
            Ok(_) = cancel.wait_for(|cancelled| *cancelled) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Answers every submission with a fixed verdict.
    struct FixedVerdict {
        verdict: fn() -> Result<VerifiedConfirmation, VerificationError>,
        calls: AtomicUsize,
    }

    impl FixedVerdict {
        fn new(verdict: fn() -> Result<VerifiedConfirmation, VerificationError>) -> Self {
            Self {
                verdict,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SourceVerifier for FixedVerdict {
        async fn submit(
            &self,
            _request: &VerificationRequest,
        ) -> Result<VerifiedConfirmation, VerificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.verdict)()
        }
    }

    fn request() -> VerificationRequest {
        VerificationRequest {
            artifact: "Swap".into(),
            role: ContractRole::Contract,
            address: Address::repeat_byte(0x42),
            constructor_args: Bytes::new(),
            source: SourceRef {
                fully_qualified_name: "contracts/Swap.sol:Swap".into(),
                build_info: None,
            },
        }
    }

    #[tokio::test]
    async fn test_verified() {
        let verifier = Verifier::new(FixedVerdict::new(|| {
            Ok(VerifiedConfirmation {
                address: Address::repeat_byte(0x42),
                message: "Pass - Verified".into(),
            })
        }))
        .with_settle_delay(Duration::ZERO);

        assert_eq!(verifier.verify(&request()).await, VerificationOutcome::Verified);
    }

    #[tokio::test]
    async fn test_failures_are_classified() {
        let cases: [(fn() -> Result<VerifiedConfirmation, VerificationError>, &str); 4] = [
            (|| Err(VerificationError::AlreadyVerified), "already_verified"),
            (
                || Err(VerificationError::NotYetIndexed("Unable to locate ContractCode".into())),
                "not_yet_indexed",
            ),
            (
                || Err(VerificationError::ArgumentMismatch("Fail - Unable to verify".into())),
                "argument_mismatch",
            ),
            (
                || {
                    Err(VerificationError::Service {
                        cause: anyhow::anyhow!("connection refused"),
                    })
                },
                "failed",
            ),
        ];

        for (verdict, expected) in cases {
            let verifier =
                Verifier::new(FixedVerdict::new(verdict)).with_settle_delay(Duration::ZERO);
            let outcome = verifier.verify(&request()).await;
            assert_eq!(outcome.as_ref(), expected);
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_settle_wait() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let verifier = Verifier::new(FixedVerdict::new(|| Err(VerificationError::AlreadyVerified)))
            .with_settle_delay(Duration::from_secs(3600))
            .with_cancel(cancel_rx);

        let request = request();
        let (outcome, _) = tokio::join!(verifier.verify(&request), async {
            tokio::task::yield_now().await;
            cancel_tx.send(true).unwrap();
        });

        assert_eq!(outcome, VerificationOutcome::Cancelled);
        assert_eq!(verifier.backend().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_waits_for_settle_delay() {
        let verifier = Verifier::new(FixedVerdict::new(|| Err(VerificationError::AlreadyVerified)))
            .with_settle_delay(Duration::from_secs(60));

        let request = request();
        let start = tokio::time::Instant::now();
        let (outcome, _) = tokio::join!(verifier.verify(&request), async {
            tokio::time::sleep(Duration::from_secs(59)).await;
            assert_eq!(verifier.backend().calls.load(Ordering::SeqCst), 0);
        });

        assert_eq!(outcome, VerificationOutcome::AlreadyVerified);
        assert_eq!(verifier.backend().calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_dropped_cancel_sender_still_submits() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        drop(cancel_tx);

        let verifier = Verifier::new(FixedVerdict::new(|| Err(VerificationError::AlreadyVerified)))
            .with_settle_delay(Duration::from_millis(10))
            .with_cancel(cancel_rx);

        assert_eq!(
            verifier.verify(&request()).await,
            VerificationOutcome::AlreadyVerified
        );
    }
}
