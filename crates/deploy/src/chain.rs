//! Network capability used by the deployer, and its JSON-RPC implementation.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, U256};
use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::rpc;

/// A transaction as submitted through `eth_sendTransaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: Address,
    /// `None` creates a contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

impl TransactionRequest {
    /// A contract creation transaction.
    pub fn create(from: Address, data: Bytes) -> Self {
        Self {
            from,
            to: None,
            data,
            value: None,
        }
    }

    /// A call to an existing contract.
    pub fn call(from: Address, to: Address, data: Bytes) -> Self {
        Self {
            from,
            to: Some(to),
            data,
            value: None,
        }
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }
}

/// The fields of a transaction receipt the deployer relies on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(deserialize_with = "rpc::deserialize_u64_from_hex")]
    pub block_number: u64,
    #[serde(default)]
    pub contract_address: Option<Address>,
    /// `true` when the transaction executed successfully.
    #[serde(deserialize_with = "deserialize_status")]
    pub status: bool,
}

fn deserialize_status<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    rpc::deserialize_u64_from_hex(deserializer).map(|status| status == 1)
}

/// Capability to mutate and query one network.
///
/// Implementations report transport and node errors through `anyhow`; the
/// deployer decides which of them are fatal.
pub trait ChainClient: Send + Sync {
    /// The account that signs and pays for every transaction.
    fn sender(&self) -> Address;

    /// Submit a transaction, returning its hash.
    fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> impl Future<Output = anyhow::Result<B256>> + Send;

    /// The receipt of a mined transaction, `None` while it is pending.
    fn transaction_receipt(
        &self,
        tx: B256,
    ) -> impl Future<Output = anyhow::Result<Option<TransactionReceipt>>> + Send;

    /// Read one storage slot at the latest block.
    fn storage_at(
        &self,
        address: Address,
        slot: B256,
    ) -> impl Future<Output = anyhow::Result<B256>> + Send;
}

/// [`ChainClient`] over an Ethereum JSON-RPC endpoint.
///
/// Transactions go through `eth_sendTransaction`, so the endpoint must be able
/// to sign for the sender (a dev node, or a signing proxy in front of the network).
#[derive(Debug, Clone)]
pub struct JsonRpcChain {
    client: reqwest::Client,
    rpc_url: Url,
    sender: Address,
}

impl JsonRpcChain {
    pub fn new(rpc_url: Url, sender: Address) -> anyhow::Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            rpc_url,
            sender,
        })
    }

    /// The chain ID reported by the endpoint.
    pub async fn chain_id(&self) -> anyhow::Result<u64> {
        let chain_id: String =
            rpc::json_rpc_call(&self.client, self.rpc_url.as_str(), "eth_chainId", vec![])
                .await?;
        u64::from_str_radix(chain_id.trim_start_matches("0x"), 16)
            .with_context(|| format!("Invalid chain ID returned by endpoint: {chain_id}"))
    }
}

impl ChainClient for JsonRpcChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> anyhow::Result<B256> {
        rpc::json_rpc_call(
            &self.client,
            self.rpc_url.as_str(),
            "eth_sendTransaction",
            vec![serde_json::to_value(&tx).context("Failed to serialize transaction")?],
        )
        .await
    }

    async fn transaction_receipt(&self, tx: B256) -> anyhow::Result<Option<TransactionReceipt>> {
        rpc::json_rpc_call(
            &self.client,
            self.rpc_url.as_str(),
            "eth_getTransactionReceipt",
            vec![serde_json::json!(tx)],
        )
        .await
    }

    async fn storage_at(&self, address: Address, slot: B256) -> anyhow::Result<B256> {
        rpc::json_rpc_call(
            &self.client,
            self.rpc_url.as_str(),
            "eth_getStorageAt",
            vec![
                serde_json::json!(address),
                serde_json::json!(slot),
                serde_json::json!("latest"),
            ],
        )
        .await
    }
}
