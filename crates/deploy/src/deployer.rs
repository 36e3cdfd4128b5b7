//! Executes a single plan step against the network.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use serde::Serialize;

use crate::{
    AddressLedger, ArtifactKind, ArtifactRegistry, ArtifactSpec, ChainClient, CompiledArtifact,
    DeployError, SourceRef, Step, StepAction, TransactionReceipt, TransactionRequest, UpgradeCall,
    abi, rpc,
};

/// Default upper bound for a transaction to be mined.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between two receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The part a created contract plays in its artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContractRole {
    /// The artifact's own contract.
    Contract,
    /// The logic contract behind a proxy.
    Implementation,
    /// The proxy holding the artifact's state.
    Proxy,
}

/// A contract created on-chain, with what is needed to verify its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedContract {
    pub artifact: String,
    pub role: ContractRole,
    pub address: Address,
    pub source: SourceRef,
    /// ABI-encoded constructor arguments.
    pub constructor_args: Bytes,
    pub transaction: B256,
}

/// Outcome of a deploy step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployResult {
    pub artifact: String,
    /// The address recorded in the ledger (the proxy for upgradeable artifacts).
    pub address: Address,
    pub transaction: B256,
    pub contracts: Vec<DeployedContract>,
}

/// Outcome of an upgrade step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeConfirmation {
    pub target: String,
    /// The proxy address, unchanged by the upgrade.
    pub address: Address,
    pub implementation: Address,
    /// The upgrade call.
    pub transaction: B256,
    pub contracts: Vec<DeployedContract>,
}

/// What a successful step produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutput {
    Deployed(DeployResult),
    Upgraded(UpgradeConfirmation),
}

impl StepOutput {
    /// Contracts created by the step, in creation order.
    pub fn contracts(&self) -> &[DeployedContract] {
        match self {
            Self::Deployed(result) => &result.contracts,
            Self::Upgraded(confirmation) => &confirmation.contracts,
        }
    }

    /// The address the step is about.
    pub fn address(&self) -> Address {
        match self {
            Self::Deployed(result) => result.address,
            Self::Upgraded(confirmation) => confirmation.address,
        }
    }
}

/// Submits deployments and upgrades, then waits for their confirmation.
///
/// The deployer never writes the ledger: it only reads resolved dependencies
/// and hands back what it created.
#[derive(Debug, Clone)]
pub struct Deployer<C> {
    chain: C,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl<C: ChainClient> Deployer<C> {
    pub fn new(chain: C) -> Self {
        Self {
            chain,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Execute one enabled step.
    ///
    /// Every dependency is resolved before the first transaction, so a
    /// configuration error never leaves a half-deployed artifact behind.
    pub async fn execute(
        &self,
        step: &Step,
        registry: &ArtifactRegistry,
        ledger: &AddressLedger,
    ) -> Result<StepOutput, DeployError> {
        let spec = step.resolve(registry)?;

        for name in step.dependencies(spec) {
            ledger.get(&name)?;
        }

        match &step.action {
            StepAction::Deploy { artifact } => {
                if ledger.contains(artifact) {
                    return Err(DeployError::DuplicateAssignment(artifact.clone()));
                }
                self.deploy(spec, registry, ledger)
                    .await
                    .map(StepOutput::Deployed)
            }
            StepAction::UpgradeProxy {
                target,
                admin,
                call,
                ..
            } => self
                .upgrade(target, admin.as_deref(), call.as_ref(), spec, registry, ledger)
                .await
                .map(StepOutput::Upgraded),
        }
    }

    async fn deploy(
        &self,
        spec: &ArtifactSpec,
        registry: &ArtifactRegistry,
        ledger: &AddressLedger,
    ) -> Result<DeployResult, DeployError> {
        let compiled = registry.compiled(&spec.contract)?;

        match spec.kind {
            ArtifactKind::Plain => {
                let args = abi::constructor_args(&spec.name, compiled, &spec.args, ledger)?;
                let contract = self
                    .create(&spec.name, ContractRole::Contract, compiled, args)
                    .await?;

                Ok(DeployResult {
                    artifact: spec.name.clone(),
                    address: contract.address,
                    transaction: contract.transaction,
                    contracts: vec![contract],
                })
            }
            ArtifactKind::UpgradeableProxy => {
                let proxy = registry.proxy()?;
                let init_data = abi::initializer_call(spec, compiled, ledger)?;

                let implementation = self
                    .create(&spec.name, ContractRole::Implementation, compiled, Bytes::new())
                    .await?;

                let proxy_args =
                    abi::proxy_constructor_args(proxy, implementation.address, init_data)?;
                let proxy = self
                    .create(&spec.name, ContractRole::Proxy, proxy, proxy_args)
                    .await?;

                Ok(DeployResult {
                    artifact: spec.name.clone(),
                    address: proxy.address,
                    transaction: proxy.transaction,
                    contracts: vec![implementation, proxy],
                })
            }
        }
    }

    async fn upgrade(
        &self,
        target: &str,
        admin: Option<&str>,
        call: Option<&UpgradeCall>,
        spec: &ArtifactSpec,
        registry: &ArtifactRegistry,
        ledger: &AddressLedger,
    ) -> Result<UpgradeConfirmation, DeployError> {
        let proxy_address = ledger.get(target)?;
        let admin_address = admin.map(|name| ledger.get(name)).transpose()?;

        let compiled = registry.compiled(&spec.contract)?;
        // The initializer already ran inside the proxy constructor.
        let call_data = call
            .map(|call| call.encode(&spec.name, compiled, ledger))
            .transpose()?
            .unwrap_or_default();

        let implementation = self
            .create(&spec.name, ContractRole::Implementation, compiled, Bytes::new())
            .await?;

        let request = match admin_address {
            Some(admin_address) => TransactionRequest::call(
                self.chain.sender(),
                admin_address,
                abi::admin_upgrade_and_call(proxy_address, implementation.address, call_data),
            ),
            None => TransactionRequest::call(
                self.chain.sender(),
                proxy_address,
                abi::upgrade_to_and_call(implementation.address, call_data),
            ),
        };

        tracing::info!(
            target_name = %target,
            proxy = %proxy_address,
            implementation = %implementation.address,
            via_admin = admin_address.is_some(),
            call = call.map(|call| call.function.as_str()),
            "Upgrading proxy..."
        );

        let receipt = self.submit(&spec.name, request).await?;

        let slot = self
            .chain
            .storage_at(proxy_address, abi::IMPLEMENTATION_SLOT)
            .await
            .map_err(|cause| DeployError::Submission {
                artifact: spec.name.clone(),
                cause: cause.context("Failed to read the proxy implementation slot"),
            })?;

        let found = abi::address_from_word(slot);
        if found != implementation.address {
            return Err(DeployError::UpgradeNotApplied {
                target: target.to_string(),
                expected: implementation.address,
                found,
            });
        }

        tracing::info!(
            target_name = %target,
            proxy = %proxy_address,
            implementation = %implementation.address,
            tx = %receipt.transaction_hash,
            "Proxy upgraded"
        );

        Ok(UpgradeConfirmation {
            target: target.to_string(),
            address: proxy_address,
            implementation: implementation.address,
            transaction: receipt.transaction_hash,
            contracts: vec![implementation],
        })
    }

    /// Create one contract and wait for its address.
    async fn create(
        &self,
        artifact: &str,
        role: ContractRole,
        compiled: &CompiledArtifact,
        constructor_args: Bytes,
    ) -> Result<DeployedContract, DeployError> {
        let data = abi::creation_data(compiled, &constructor_args)?;

        tracing::info!(
            artifact,
            %role,
            contract = %compiled.contract_name,
            "Deploying contract..."
        );

        let receipt = self
            .submit(artifact, TransactionRequest::create(self.chain.sender(), data))
            .await?;

        let address = receipt
            .contract_address
            .ok_or_else(|| DeployError::Submission {
                artifact: artifact.to_string(),
                cause: anyhow::anyhow!(
                    "receipt of {} has no contract address",
                    receipt.transaction_hash
                ),
            })?;

        tracing::info!(
            artifact,
            %role,
            %address,
            tx = %receipt.transaction_hash,
            block = receipt.block_number,
            "Contract deployed"
        );

        Ok(DeployedContract {
            artifact: artifact.to_string(),
            role,
            address,
            source: compiled.source_ref(),
            constructor_args,
            transaction: receipt.transaction_hash,
        })
    }

    /// Send a transaction and wait for a successful receipt.
    async fn submit(
        &self,
        artifact: &str,
        tx: TransactionRequest,
    ) -> Result<TransactionReceipt, DeployError> {
        let hash = self
            .chain
            .send_transaction(tx)
            .await
            .map_err(|cause| DeployError::Submission {
                artifact: artifact.to_string(),
                cause,
            })?;

        tracing::debug!(artifact, tx = %hash, "Transaction submitted, waiting for receipt...");

        let receipt = rpc::wait_until(
            &format!("receipt of {hash}"),
            self.confirmation_timeout,
            self.poll_interval,
            || self.chain.transaction_receipt(hash),
        )
        .await
        .map_err(|timeout| DeployError::ConfirmationTimeout {
            artifact: artifact.to_string(),
            tx: hash,
            timeout: self.confirmation_timeout,
            last_error: timeout.last_error.map(|e| format!("{e:#}")),
        })?;

        if !receipt.status {
            return Err(DeployError::Reverted {
                artifact: artifact.to_string(),
                tx: hash,
            });
        }

        Ok(receipt)
    }
}
