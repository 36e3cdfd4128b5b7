//! chainplan-deploy - Deployment and upgrade orchestration for on-chain artifacts.
//!
//! This crate runs a declarative step plan against an EVM network: it deploys
//! plain and proxied contracts, upgrades proxies, records the resulting
//! addresses in a ledger and submits every created contract for source
//! verification.

pub mod abi;
pub mod rpc;

mod artifact;
pub use artifact::{
    ArgValue, ArtifactDefinition, ArtifactKind, ArtifactRegistry, ArtifactSpec, CompiledArtifact,
    DEFAULT_PROXY_CONTRACT, SourceRef,
};

mod chain;
pub use chain::{ChainClient, JsonRpcChain, TransactionReceipt, TransactionRequest};

mod config;
pub use config::{
    BuildConfig, CONFIG_FILENAME, ENV_PREFIX, NetworkConfig, PlanConfig, VerificationConfig,
};

pub mod deployer;
pub use deployer::{
    ContractRole, DeployResult, DeployedContract, Deployer, StepOutput, UpgradeConfirmation,
};

mod error;
pub use error::{DeployError, StepError};

pub mod etherscan;
pub use etherscan::EtherscanClient;

mod ledger;
pub use ledger::{AddressLedger, EntryOrigin, LedgerEntry};

mod orchestrator;
pub use orchestrator::{
    AbortReason, Orchestrator, RunReport, RunState, StepRecord, StepStatus, VerificationRecord,
};

mod plan;
pub use plan::{Step, StepAction, StepPlan, UpgradeCall};

pub mod report;

pub mod verifier;
pub use verifier::{
    SourceVerifier, VerificationError, VerificationOutcome, VerificationRequest,
    VerifiedConfirmation, Verifier,
};
