//! Plan configuration file.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    ArtifactDefinition, ArtifactRegistry, ArtifactSpec, DEFAULT_PROXY_CONTRACT, Step, StepPlan,
    deployer::{DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_POLL_INTERVAL},
    etherscan::{DEFAULT_STATUS_POLL_ATTEMPTS, DEFAULT_STATUS_POLL_INTERVAL},
    verifier::DEFAULT_SETTLE_DELAY,
};

/// The default name for the chainplan configuration file.
pub const CONFIG_FILENAME: &str = "Chainplan.toml";

/// Prefix of environment variables overriding configuration keys.
/// Nested keys are separated by `__`, e.g. `CHAINPLAN_VERIFICATION__API_KEY`.
pub const ENV_PREFIX: &str = "CHAINPLAN_";

/// Connection settings for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: Url,
    /// Account sending every transaction. Must be unlocked on the endpoint.
    pub sender: Address,
    /// Expected chain ID, checked against the endpoint before running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_confirmation_timeout_secs() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl NetworkConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Source verification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub enabled: bool,
    /// Etherscan-compatible API endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Pause between a deployment and its verification.
    pub settle_delay_secs: u64,
    pub status_poll_interval_secs: u64,
    pub status_poll_attempts: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: None,
            api_key: None,
            settle_delay_secs: DEFAULT_SETTLE_DELAY.as_secs(),
            status_poll_interval_secs: DEFAULT_STATUS_POLL_INTERVAL.as_secs(),
            status_poll_attempts: DEFAULT_STATUS_POLL_ATTEMPTS,
        }
    }
}

impl VerificationConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_interval_secs)
    }
}

/// Where the compiled contracts come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Hardhat artifacts directory, relative to the configuration file.
    pub artifacts_dir: PathBuf,
    /// Contract deployed in front of upgradeable artifacts.
    pub proxy_contract: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            proxy_contract: DEFAULT_PROXY_CONTRACT.to_string(),
        }
    }
}

/// Everything needed to run a plan: networks, artifacts, seed addresses and steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Name of the entry of `networks` to run against.
    pub network: String,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactDefinition>,
    /// Addresses known from prior runs.
    #[serde(default)]
    pub seed: BTreeMap<String, Address>,
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl PlanConfig {
    /// Load the configuration from a TOML file, or from `Chainplan.toml`
    /// when `path` is a directory.
    ///
    /// Seed files (as written by a previous run) are merged on top of the
    /// file's `[seed]` table, then `CHAINPLAN_*` environment variables
    /// override any key.
    pub fn load_from_file(path: &Path, seed_files: &[PathBuf]) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file or directory not found: {}",
                path.display()
            ));
        }

        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let mut figment = Figment::new().merge(Toml::file(&config_path));
        for seed_file in seed_files {
            if !seed_file.is_file() {
                anyhow::bail!("Seed file not found: {}", seed_file.display());
            }
            figment = figment.merge(Toml::file(seed_file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

        config.base_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        tracing::info!(
            path = %config_path.display(),
            network = %config.network,
            steps = config.steps.len(),
            seeded = config.seed.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// The network selected by `network`.
    pub fn active_network(&self) -> Result<&NetworkConfig> {
        self.networks.get(&self.network).with_context(|| {
            format!(
                "Network `{}` is not configured (known: {})",
                self.network,
                self.networks
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }

    pub fn plan(&self) -> StepPlan {
        StepPlan::new(self.steps.clone())
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.base_dir.join(&self.build.artifacts_dir)
    }

    /// Build the registry from the configured artifacts directory.
    pub fn load_registry(&self) -> Result<ArtifactRegistry> {
        let compiled = ArtifactRegistry::load_hardhat(&self.artifacts_dir())?;
        self.registry(compiled)
    }

    /// Build the registry from already loaded compiled contracts.
    pub fn registry(
        &self,
        compiled: impl IntoIterator<Item = crate::CompiledArtifact>,
    ) -> Result<ArtifactRegistry> {
        let mut registry =
            ArtifactRegistry::new(self.build.proxy_contract.clone()).with_compiled(compiled);

        for (name, definition) in &self.artifacts {
            registry
                .define(ArtifactSpec::from_definition(name.clone(), definition.clone()))
                .with_context(|| format!("Invalid artifact definition `{name}`"))?;
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
    use tempdir::TempDir;

    use super::*;
    use crate::{ArgValue, ArtifactKind, CompiledArtifact, StepAction};

    const CONFIG: &str = r#"
network = "testnet"

[networks.testnet]
rpc_url = "http://localhost:8545"
sender = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
chain_id = 97

[verification]
api_url = "https://api-testnet.bscscan.com/api"
api_key = "secret"
settle_delay_secs = 30

[artifacts.TokenA]
contract = "PlutusToken"

[artifacts.Swap]
args = [{ ref = "TokenA" }, "0xc2A79DdAF7e95C141C20aa1B10F3411540562FF7"]

[artifacts.SwapV2]
kind = "upgradeable_proxy"

[seed]
PlutusNFT = "0xA2a42fB5E742f441414f73fF1E875d53A79C4ed7"

[[steps]]
id = "token"
action = "deploy"
artifact = "TokenA"

[[steps]]
id = "swap"
action = "deploy"
artifact = "Swap"
verify = false

[[steps]]
id = "upgrade"
action = "upgrade_proxy"
target = "Swap"
artifact = "SwapV2"
enabled = false
"#;

    fn write_config(dir: &TempDir) -> PathBuf {
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, CONFIG).unwrap();
        path
    }

    #[test]
    fn test_load_from_directory() {
        let temp_dir = TempDir::new("chainplan-config").expect("Failed to create temp dir");
        write_config(&temp_dir);

        let config = PlanConfig::load_from_file(temp_dir.path(), &[]).unwrap();

        let network = config.active_network().unwrap();
        assert_eq!(network.chain_id, Some(97));
        assert_eq!(network.confirmation_timeout(), DEFAULT_CONFIRMATION_TIMEOUT);
        assert_eq!(network.poll_interval(), DEFAULT_POLL_INTERVAL);

        assert!(config.verification.enabled);
        assert_eq!(config.verification.settle_delay(), Duration::from_secs(30));
        assert_eq!(config.verification.status_poll_attempts, DEFAULT_STATUS_POLL_ATTEMPTS);

        assert_eq!(config.build.proxy_contract, DEFAULT_PROXY_CONTRACT);
        assert_eq!(config.artifacts_dir(), temp_dir.path().join("artifacts"));

        assert_eq!(config.artifacts["TokenA"].contract.as_deref(), Some("PlutusToken"));
        assert_eq!(config.artifacts["Swap"].args[0], ArgValue::reference("TokenA"));
        assert_eq!(config.artifacts["SwapV2"].kind, ArtifactKind::UpgradeableProxy);
        assert_eq!(config.seed.len(), 1);

        let plan = config.plan();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.enabled_count(), 2);
        assert!(!plan[1].verify);
        assert!(matches!(&plan[2].action, StepAction::UpgradeProxy { target, .. } if target == "Swap"));
    }

    #[test]
    fn test_missing_config() {
        let err = PlanConfig::load_from_file(Path::new("/nonexistent/Chainplan.toml"), &[])
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_unknown_network() {
        let temp_dir = TempDir::new("chainplan-config").expect("Failed to create temp dir");
        let path = write_config(&temp_dir);

        let mut config = PlanConfig::load_from_file(&path, &[]).unwrap();
        config.network = "mainnet".to_string();

        let err = config.active_network().unwrap_err();
        assert!(err.to_string().contains("known: testnet"));
    }

    #[test]
    fn test_seed_file_is_merged() {
        let temp_dir = TempDir::new("chainplan-config").expect("Failed to create temp dir");
        let path = write_config(&temp_dir);
        let seed_path = temp_dir.path().join("ledger.toml");
        std::fs::write(
            &seed_path,
            r#"
[ledger]
network = "testnet"
generated_at = "2024-01-01T00:00:00+00:00"

[seed]
TokenA = "0x5fbdb2315678afecb367f032d93f642f64180aa3"
"#,
        )
        .unwrap();

        let config = PlanConfig::load_from_file(&path, &[seed_path]).unwrap();
        assert_eq!(config.network, "testnet");
        assert_eq!(
            config.seed.keys().collect::<Vec<_>>(),
            vec!["PlutusNFT", "TokenA"]
        );
    }

    #[test]
    fn test_registry_from_definitions() {
        let temp_dir = TempDir::new("chainplan-config").expect("Failed to create temp dir");
        let path = write_config(&temp_dir);
        let config = PlanConfig::load_from_file(&path, &[]).unwrap();

        let swap_abi: JsonAbi = serde_json::from_str(
            r#"[{"type":"constructor","stateMutability":"nonpayable","inputs":[
                {"name":"token","type":"address"},
                {"name":"nft","type":"address"}
            ]}]"#,
        )
        .unwrap();
        let compiled = |name: &str| {
            let abi = if name == "Swap" {
                swap_abi.clone()
            } else {
                JsonAbi::default()
            };
            CompiledArtifact::new(
                name,
                format!("contracts/{name}.sol"),
                abi,
                Bytes::from_static(&[0x60]),
            )
        };

        let registry = config
            .registry(["PlutusToken", "Swap", "SwapV2", "ERC1967Proxy"].map(compiled))
            .unwrap();
        assert_eq!(registry.resolve("TokenA").unwrap().contract, "PlutusToken");
        assert!(config.plan().check(&registry, &Default::default()).is_ok());

        let err = config
            .registry(["Swap", "SwapV2", "ERC1967Proxy"].map(compiled))
            .unwrap_err();
        assert!(format!("{err:#}").contains("unknown artifact `PlutusToken`"));
    }
}
