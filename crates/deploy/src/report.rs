//! Human-readable run summaries and the reusable ledger file.

use std::path::Path;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{AddressLedger, RunReport, StepOutput, StepRecord, StepStatus};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Resolved names with their address and origin, in resolution order.
pub fn ledger_table(ledger: &AddressLedger) -> Table {
    let mut table = new_table(vec!["Name", "Address", "Origin"]);
    for (name, entry) in ledger.iter() {
        table.add_row(vec![
            name.to_string(),
            entry.address.to_checksum(None),
            entry.origin.to_string(),
        ]);
    }
    table
}

/// One row per step: its status and the address it produced.
pub fn steps_table(steps: &[StepRecord]) -> Table {
    let mut table = new_table(vec!["Step", "Status", "Address", "Transaction"]);
    for record in steps {
        let (status, address, transaction) = match &record.status {
            StepStatus::Skipped => ("skipped".to_string(), String::new(), String::new()),
            StepStatus::Completed { output } => {
                let transaction = match output {
                    StepOutput::Deployed(result) => result.transaction,
                    StepOutput::Upgraded(confirmation) => confirmation.transaction,
                };
                (
                    "completed".to_string(),
                    output.address().to_checksum(None),
                    transaction.to_string(),
                )
            }
            StepStatus::Failed { error } => (format!("failed: {error}"), String::new(), String::new()),
        };
        table.add_row(vec![record.step_id.clone(), status, address, transaction]);
    }
    table
}

/// One row per created contract with its verification outcome.
pub fn verification_table(report: &RunReport) -> Table {
    let mut table = new_table(vec!["Artifact", "Role", "Address", "Verification", "Detail"]);
    for record in report.verifications() {
        table.add_row(vec![
            record.artifact.clone(),
            record.role.to_string(),
            record.address.to_checksum(None),
            record.outcome.as_ref().to_string(),
            record.outcome.detail().unwrap_or_default().to_string(),
        ]);
    }
    table
}

/// Metadata written alongside the addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMetadata {
    pub network: String,
    /// RFC 3339 timestamp.
    pub generated_at: String,
    /// `false` when the run aborted and the ledger is partial.
    pub completed: bool,
}

/// Ledger snapshot in the `[seed]` format of the configuration file, so it
/// can be passed back as a seed file on the next run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFile {
    pub ledger: LedgerMetadata,
    pub seed: IndexMap<String, Address>,
}

impl LedgerFile {
    pub fn from_report(network: impl Into<String>, report: &RunReport) -> Self {
        Self {
            ledger: LedgerMetadata {
                network: network.into(),
                generated_at: chrono::Utc::now().to_rfc3339(),
                completed: report.is_completed(),
            },
            seed: report.ledger.to_map(),
        }
    }

    /// Save the ledger to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize ledger to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write ledger to {}", path.display()))?;
        tracing::info!(path = %path.display(), entries = self.seed.len(), "Ledger saved");
        Ok(())
    }
}
