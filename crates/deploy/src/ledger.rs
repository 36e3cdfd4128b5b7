//! Run-scoped mapping from artifact names to on-chain addresses.

use alloy_core::primitives::Address;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::DeployError;

/// Where a ledger entry came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryOrigin {
    /// Supplied by the operator from a prior run.
    Seeded,
    /// Produced by a deploy step of this run.
    Deployed,
}

/// A single resolved name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub address: Address,
    pub origin: EntryOrigin,
}

/// Mapping from artifact name to address, kept in resolution order.
///
/// Each name is written at most once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressLedger {
    entries: IndexMap<String, LedgerEntry>,
}

impl AddressLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load addresses known from prior runs.
    ///
    /// Seeded addresses are trusted as-is and not checked on-chain.
    pub fn seed<I, S>(&mut self, initial: I) -> Result<(), DeployError>
    where
        I: IntoIterator<Item = (S, Address)>,
        S: Into<String>,
    {
        for (name, address) in initial {
            self.insert(name.into(), address, EntryOrigin::Seeded)?;
        }
        Ok(())
    }

    /// Look up the address of a resolved name.
    pub fn get(&self, name: &str) -> Result<Address, DeployError> {
        self.entries
            .get(name)
            .map(|entry| entry.address)
            .ok_or_else(|| DeployError::UnresolvedDependency(name.to_string()))
    }

    /// Record the address produced by a deployment.
    pub fn set(&mut self, name: impl Into<String>, address: Address) -> Result<(), DeployError> {
        self.insert(name.into(), address, EntryOrigin::Deployed)
    }

    fn insert(
        &mut self,
        name: String,
        address: Address,
        origin: EntryOrigin,
    ) -> Result<(), DeployError> {
        if self.entries.contains_key(&name) {
            return Err(DeployError::DuplicateAssignment(name));
        }

        tracing::debug!(name, %address, %origin, "Ledger entry resolved");
        self.entries.insert(name, LedgerEntry { address, origin });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn entry(&self, name: &str) -> Option<&LedgerEntry> {
        self.entries.get(name)
    }

    /// Entries in resolution order (seeded entries first).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LedgerEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Names produced by this run, in the order they were resolved.
    pub fn deployed_names(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, entry)| entry.origin == EntryOrigin::Deployed)
            .map(|(name, _)| name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Plain name to address mapping, in resolution order.
    pub fn to_map(&self) -> IndexMap<String, Address> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.address))
            .collect()
    }
}
