//! Errors raised while executing a step plan.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};

/// Errors that abort an orchestrator run.
///
/// Verification problems are not part of this taxonomy: they are reported as
/// [`crate::VerificationOutcome`]s and never stop a run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// No artifact definition or compiled contract with this name.
    #[error("unknown artifact `{0}`")]
    UnknownArtifact(String),
    /// A dependency has no address in the ledger yet.
    #[error("unresolved dependency `{0}`")]
    UnresolvedDependency(String),
    /// The name already has an address in this run.
    #[error("`{0}` already has an address in this run")]
    DuplicateAssignment(String),
    /// An upgrade step points at an artifact that cannot sit behind a proxy.
    #[error("`{0}` is not an upgradeable proxy artifact")]
    NotUpgradeable(String),
    /// The configured arguments do not match the contract interface.
    #[error("invalid arguments for `{artifact}`: {reason}")]
    InvalidArguments { artifact: String, reason: String },
    /// The compiled contract has no creation bytecode (interface or abstract contract).
    #[error("contract `{0}` has no deployable bytecode")]
    EmptyBytecode(String),
    /// The network rejected the transaction or the endpoint failed.
    #[error("failed to submit transaction for `{artifact}`: {cause:#}")]
    Submission { artifact: String, cause: anyhow::Error },
    /// No receipt was observed within the configured bound.
    #[error(
        "transaction {tx} for `{artifact}` not confirmed within {timeout:?}{}",
        last_error_suffix(.last_error)
    )]
    ConfirmationTimeout {
        artifact: String,
        tx: B256,
        timeout: Duration,
        /// Why the last receipt poll failed, when it did.
        last_error: Option<String>,
    },
    /// The transaction was mined with a failed status.
    #[error("transaction {tx} for `{artifact}` reverted")]
    Reverted { artifact: String, tx: B256 },
    /// The proxy does not point at the new implementation after the upgrade.
    #[error("upgrade of `{target}` not applied: expected implementation {expected}, found {found}")]
    UpgradeNotApplied {
        target: String,
        expected: Address,
        found: Address,
    },
    /// The run was cancelled between two steps.
    #[error("run cancelled")]
    Cancelled,
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|error| format!(" (last receipt poll failed: {error})"))
        .unwrap_or_default()
}

/// A [`DeployError`] attributed to the step that raised it.
#[derive(Debug, thiserror::Error)]
#[error("step `{step_id}`: {error}")]
pub struct StepError {
    pub step_id: String,
    #[source]
    pub error: DeployError,
}

impl StepError {
    pub fn new(step_id: impl Into<String>, error: DeployError) -> Self {
        Self {
            step_id: step_id.into(),
            error,
        }
    }
}

impl DeployError {
    /// Returns true for errors caused by the plan or its configuration, as
    /// opposed to failures observed on the network.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownArtifact(_)
                | Self::UnresolvedDependency(_)
                | Self::DuplicateAssignment(_)
                | Self::NotUpgradeable(_)
                | Self::InvalidArguments { .. }
                | Self::EmptyBytecode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(DeployError::UnknownArtifact("A".into()).is_configuration());
        assert!(DeployError::UnresolvedDependency("A".into()).is_configuration());
        assert!(DeployError::DuplicateAssignment("A".into()).is_configuration());
        assert!(!DeployError::Cancelled.is_configuration());
        assert!(
            !DeployError::Reverted {
                artifact: "A".into(),
                tx: B256::ZERO,
            }
            .is_configuration()
        );
    }

    #[test]
    fn test_timeout_message_includes_last_poll_error() {
        let err = DeployError::ConfirmationTimeout {
            artifact: "Swap".into(),
            tx: B256::ZERO,
            timeout: Duration::from_secs(1),
            last_error: Some("401 Unauthorized".into()),
        };
        assert!(err.to_string().ends_with("within 1s (last receipt poll failed: 401 Unauthorized)"));

        let quiet = DeployError::ConfirmationTimeout {
            artifact: "Swap".into(),
            tx: B256::ZERO,
            timeout: Duration::from_secs(1),
            last_error: None,
        };
        assert!(quiet.to_string().ends_with("within 1s"));
    }

    #[test]
    fn test_submission_message_includes_cause() {
        let err = DeployError::Submission {
            artifact: "Swap".into(),
            cause: anyhow::anyhow!("insufficient funds"),
        };
        assert_eq!(
            err.to_string(),
            "failed to submit transaction for `Swap`: insufficient funds"
        );
    }
}
