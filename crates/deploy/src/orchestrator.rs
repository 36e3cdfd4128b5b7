//! Runs a step plan from start to finish.

use std::fmt;

use alloy_core::primitives::Address;
use derive_more::Display;
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    AddressLedger, ArtifactRegistry, ChainClient, ContractRole, DeployError, Deployer,
    SourceVerifier, Step, StepOutput, StepPlan, VerificationOutcome, VerificationRequest, Verifier,
};

/// Why a run stopped before the end of the plan.
#[derive(Debug)]
pub struct AbortReason {
    /// The step being started or executed, `None` when seeding the ledger failed.
    pub step_id: Option<String>,
    pub error: DeployError,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step_id) => write!(f, "step `{step_id}`: {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Lifecycle of a run.
#[derive(Debug, Display)]
pub enum RunState {
    #[display("idle")]
    Idle,
    /// Executing the step at this plan index.
    #[display("running step {_0}")]
    Running(usize),
    #[display("completed")]
    Completed,
    #[display("aborted ({_0})")]
    Aborted(AbortReason),
}

/// Verification result for one created contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRecord {
    pub artifact: String,
    pub role: ContractRole,
    pub address: Address,
    pub outcome: VerificationOutcome,
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// Disabled in the plan.
    Skipped,
    Completed { output: StepOutput },
    Failed { error: String },
}

/// What happened to one step of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step_id: String,
    pub status: StepStatus,
    pub verifications: Vec<VerificationRecord>,
}

/// Final state of a run, with the ledger as it stood when the run ended.
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub ledger: AddressLedger,
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.state, RunState::Completed)
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match &self.state {
            RunState::Aborted(reason) => Some(reason),
            _ => None,
        }
    }

    /// Every verification attempted or skipped, in plan order.
    pub fn verifications(&self) -> impl Iterator<Item = &VerificationRecord> {
        self.steps.iter().flat_map(|step| step.verifications.iter())
    }
}

/// Executes the enabled steps of a plan in order, keeping the address ledger
/// and submitting created contracts for verification.
pub struct Orchestrator<C, V> {
    registry: ArtifactRegistry,
    deployer: Deployer<C>,
    /// `None` disables verification for the whole run.
    verifier: Option<Verifier<V>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<C: ChainClient, V: SourceVerifier> Orchestrator<C, V> {
    pub fn new(registry: ArtifactRegistry, deployer: Deployer<C>) -> Self {
        Self {
            registry,
            deployer,
            verifier: None,
            cancel: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Verifier<V>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Stop before the next step once the receiver observes `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run the plan against a ledger seeded with addresses from prior runs.
    ///
    /// Always returns a report: on abort it carries the partial ledger so the
    /// operator can seed the next run with it.
    pub async fn run<I, S>(&self, plan: &StepPlan, seed: I) -> RunReport
    where
        I: IntoIterator<Item = (S, Address)>,
        S: Into<String>,
    {
        let mut state = RunState::Idle;
        let mut ledger = AddressLedger::new();
        let mut steps = Vec::with_capacity(plan.len());

        let result = self
            .execute(plan, seed, &mut ledger, &mut steps, &mut state)
            .await;

        let state = match result {
            Ok(()) => {
                tracing::info!(
                    steps = steps.len(),
                    deployed = ledger.deployed_names().len(),
                    "Run completed"
                );
                RunState::Completed
            }
            Err(reason) => {
                tracing::error!(
                    step = reason.step_id.as_deref().unwrap_or("-"),
                    error = %reason.error,
                    resolved = ledger.len(),
                    "Run aborted"
                );
                RunState::Aborted(reason)
            }
        };

        RunReport {
            state,
            ledger,
            steps,
        }
    }

    async fn execute<I, S>(
        &self,
        plan: &StepPlan,
        seed: I,
        ledger: &mut AddressLedger,
        records: &mut Vec<StepRecord>,
        state: &mut RunState,
    ) -> Result<(), AbortReason>
    where
        I: IntoIterator<Item = (S, Address)>,
        S: Into<String>,
    {
        ledger.seed(seed).map_err(|error| AbortReason {
            step_id: None,
            error,
        })?;

        plan.check(&self.registry, ledger)
            .map_err(|e| AbortReason {
                step_id: Some(e.step_id),
                error: e.error,
            })?;

        tracing::info!(
            steps = plan.len(),
            enabled = plan.enabled_count(),
            seeded = ledger.len(),
            verification = self.verifier.is_some(),
            "Plan checked, starting run..."
        );

        for (index, step) in plan.iter().enumerate() {
            if self.is_cancelled() {
                return Err(AbortReason {
                    step_id: Some(step.id.clone()),
                    error: DeployError::Cancelled,
                });
            }

            if !step.enabled {
                tracing::info!(step = %step.id, "Step disabled, skipping");
                records.push(StepRecord {
                    step_id: step.id.clone(),
                    status: StepStatus::Skipped,
                    verifications: Vec::new(),
                });
                continue;
            }

            transition(state, RunState::Running(index));
            tracing::info!(
                step = %step.id,
                artifact = step.artifact(),
                position = index + 1,
                total = plan.len(),
                "Executing step..."
            );

            let output = match self.deployer.execute(step, &self.registry, ledger).await {
                Ok(output) => output,
                Err(error) => {
                    records.push(StepRecord {
                        step_id: step.id.clone(),
                        status: StepStatus::Failed {
                            error: error.to_string(),
                        },
                        verifications: Vec::new(),
                    });
                    return Err(AbortReason {
                        step_id: Some(step.id.clone()),
                        error,
                    });
                }
            };

            if let StepOutput::Deployed(result) = &output {
                ledger
                    .set(result.artifact.clone(), result.address)
                    .map_err(|error| AbortReason {
                        step_id: Some(step.id.clone()),
                        error,
                    })?;
            }

            let verifications = self.verify(step, &output).await;

            records.push(StepRecord {
                step_id: step.id.clone(),
                status: StepStatus::Completed { output },
                verifications,
            });
        }

        Ok(())
    }

    /// Verify every contract the step created. Never fails the step.
    async fn verify(&self, step: &Step, output: &StepOutput) -> Vec<VerificationRecord> {
        let mut records = Vec::with_capacity(output.contracts().len());

        for contract in output.contracts() {
            let outcome = match &self.verifier {
                Some(verifier) if step.verify => {
                    verifier
                        .verify(&VerificationRequest::from(contract))
                        .await
                }
                _ => {
                    tracing::debug!(
                        step = %step.id,
                        address = %contract.address,
                        "Verification disabled, skipping"
                    );
                    VerificationOutcome::Skipped
                }
            };

            records.push(VerificationRecord {
                artifact: contract.artifact.clone(),
                role: contract.role,
                address: contract.address,
                outcome,
            });
        }

        records
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|cancel| *cancel.borrow())
    }
}

fn transition(state: &mut RunState, next: RunState) {
    tracing::debug!(from = %state, to = %next, "Run state changed");
    *state = next;
}
