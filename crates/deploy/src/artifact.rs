//! Artifact registry: logical artifact definitions backed by compiled contracts.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{AddressLedger, DeployError};

/// The default contract placed in front of upgradeable implementations.
pub const DEFAULT_PROXY_CONTRACT: &str = "ERC1967Proxy";

/// How an artifact ends up on-chain.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactKind {
    /// Deployed directly through its constructor.
    #[default]
    Plain,
    /// Implementation deployed behind a proxy, initialized once during proxy construction.
    UpgradeableProxy,
}

/// A constructor or initializer argument as written in the plan.
///
/// Values are rendered to text and coerced into the parameter type the
/// contract interface declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    /// The address of another artifact, read from the ledger.
    Ref {
        #[serde(rename = "ref")]
        name: String,
    },
    Bool(bool),
    Int(i64),
    /// Any textual literal: addresses, big numbers, strings, hex bytes.
    Text(String),
    List(Vec<ArgValue>),
}

impl ArgValue {
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Ref { name: name.into() }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Ledger names this value reads.
    pub fn references(&self) -> Vec<&str> {
        match self {
            Self::Ref { name } => vec![name.as_str()],
            Self::List(items) => items.iter().flat_map(ArgValue::references).collect(),
            Self::Bool(_) | Self::Int(_) | Self::Text(_) => vec![],
        }
    }

    /// Render the value to the textual form understood by ABI coercion,
    /// substituting ledger addresses for references.
    pub fn render(&self, ledger: &AddressLedger) -> Result<String, DeployError> {
        Ok(match self {
            Self::Ref { name } => format!("{:#x}", ledger.get(name)?),
            Self::Bool(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Text(value) => value.clone(),
            Self::List(items) => {
                let rendered = items
                    .iter()
                    .map(|item| item.render(ledger))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("[{}]", rendered.join(","))
            }
        })
    }
}

/// An artifact definition as written in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDefinition {
    /// Compiled contract backing this artifact. Defaults to the artifact name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    #[serde(default)]
    pub kind: ArtifactKind,
    /// Constructor arguments (plain) or initializer arguments (upgradeable proxy).
    #[serde(default)]
    pub args: Vec<ArgValue>,
    /// Initializer function name or full signature, e.g. `initialize(address,uint256)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<String>,
}

/// A named, immutable description of something the plan can deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub name: String,
    pub kind: ArtifactKind,
    pub args: Vec<ArgValue>,
    pub initializer: Option<String>,
    /// Reference into the compiled build output.
    pub contract: String,
}

impl ArtifactSpec {
    /// A plain artifact backed by the contract of the same name.
    pub fn plain(name: impl Into<String>, args: Vec<ArgValue>) -> Self {
        let name = name.into();
        Self {
            contract: name.clone(),
            name,
            kind: ArtifactKind::Plain,
            args,
            initializer: None,
        }
    }

    /// An upgradeable artifact backed by the contract of the same name.
    pub fn upgradeable(
        name: impl Into<String>,
        initializer: Option<&str>,
        args: Vec<ArgValue>,
    ) -> Self {
        let name = name.into();
        Self {
            contract: name.clone(),
            name,
            kind: ArtifactKind::UpgradeableProxy,
            args,
            initializer: initializer.map(str::to_string),
        }
    }

    /// Use a differently named compiled contract.
    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = contract.into();
        self
    }

    pub fn from_definition(name: impl Into<String>, definition: ArtifactDefinition) -> Self {
        let name = name.into();
        Self {
            contract: definition.contract.unwrap_or_else(|| name.clone()),
            name,
            kind: definition.kind,
            args: definition.args,
            initializer: definition.initializer,
        }
    }

    /// Ledger names read by the arguments, in declaration order.
    pub fn references(&self) -> Vec<&str> {
        self.args.iter().flat_map(ArgValue::references).collect()
    }
}

/// Where the source of a compiled contract can be found for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// `path/to/Source.sol:ContractName`.
    pub fully_qualified_name: String,
    /// Compiler build info holding the standard-json input and compiler version.
    pub build_info: Option<PathBuf>,
}

/// Interface and bytecode of a compiled contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub contract_name: String,
    pub source_name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
    pub build_info: Option<PathBuf>,
}

impl CompiledArtifact {
    pub fn new(
        contract_name: impl Into<String>,
        source_name: impl Into<String>,
        abi: JsonAbi,
        bytecode: Bytes,
    ) -> Self {
        Self {
            contract_name: contract_name.into(),
            source_name: source_name.into(),
            abi,
            bytecode,
            build_info: None,
        }
    }

    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }

    pub fn source_ref(&self) -> SourceRef {
        SourceRef {
            fully_qualified_name: self.fully_qualified_name(),
            build_info: self.build_info.clone(),
        }
    }
}

/// Hardhat `hh-sol-artifact-1` file layout.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    #[serde(rename = "_format")]
    format: String,
    contract_name: String,
    source_name: String,
    abi: JsonAbi,
    bytecode: String,
}

/// Hardhat `.dbg.json` companion file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatDebugFile {
    build_info: PathBuf,
}

/// Maps logical artifact names to their definitions and compiled contracts.
#[derive(Debug, Clone)]
pub struct ArtifactRegistry {
    specs: HashMap<String, ArtifactSpec>,
    compiled: Vec<CompiledArtifact>,
    /// Lookup by contract name and by fully qualified name.
    index: HashMap<String, usize>,
    proxy_contract: String,
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_PROXY_CONTRACT)
    }
}

impl ArtifactRegistry {
    pub fn new(proxy_contract: impl Into<String>) -> Self {
        Self {
            specs: HashMap::new(),
            compiled: Vec::new(),
            index: HashMap::new(),
            proxy_contract: proxy_contract.into(),
        }
    }

    /// Add compiled contracts to the registry.
    pub fn with_compiled(mut self, artifacts: impl IntoIterator<Item = CompiledArtifact>) -> Self {
        for artifact in artifacts {
            self.register_compiled(artifact);
        }
        self
    }

    pub fn register_compiled(&mut self, artifact: CompiledArtifact) {
        let position = self.compiled.len();
        if let Some(previous) = self.index.insert(artifact.contract_name.clone(), position) {
            tracing::warn!(
                contract = %artifact.contract_name,
                previous = %self.compiled[previous].fully_qualified_name(),
                current = %artifact.fully_qualified_name(),
                "Contract name is ambiguous, use the fully qualified name to select one"
            );
        }
        self.index.insert(artifact.fully_qualified_name(), position);
        self.compiled.push(artifact);
    }

    /// Define a logical artifact. Fails if the contract it references was not compiled.
    pub fn define(&mut self, spec: ArtifactSpec) -> Result<(), DeployError> {
        self.compiled(&spec.contract)?;
        if spec.kind == ArtifactKind::UpgradeableProxy {
            self.proxy()?;
        }
        self.specs.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Builder form of [`ArtifactRegistry::define`].
    pub fn with_spec(mut self, spec: ArtifactSpec) -> Result<Self, DeployError> {
        self.define(spec)?;
        Ok(self)
    }

    /// Look up an artifact definition by logical name.
    pub fn resolve(&self, name: &str) -> Result<&ArtifactSpec, DeployError> {
        self.specs
            .get(name)
            .ok_or_else(|| DeployError::UnknownArtifact(name.to_string()))
    }

    /// Look up a compiled contract by name or fully qualified name.
    pub fn compiled(&self, contract: &str) -> Result<&CompiledArtifact, DeployError> {
        self.index
            .get(contract)
            .map(|position| &self.compiled[*position])
            .ok_or_else(|| DeployError::UnknownArtifact(contract.to_string()))
    }

    /// The compiled proxy contract used for upgradeable artifacts.
    pub fn proxy(&self) -> Result<&CompiledArtifact, DeployError> {
        self.compiled(&self.proxy_contract)
    }

    pub fn proxy_contract(&self) -> &str {
        &self.proxy_contract
    }

    /// Load every contract artifact found under a Hardhat `artifacts/` directory.
    ///
    /// Interfaces and abstract contracts are loaded too; they only fail when a
    /// step tries to deploy them.
    pub fn load_hardhat(dir: &Path) -> anyhow::Result<Vec<CompiledArtifact>> {
        if !dir.is_dir() {
            anyhow::bail!("Artifacts directory not found: {}", dir.display());
        }

        let mut artifacts = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let entries = std::fs::read_dir(&current)
                .with_context(|| format!("Failed to read directory {}", current.display()))?;

            for entry in entries {
                let path = entry
                    .with_context(|| format!("Failed to read entry in {}", current.display()))?
                    .path();

                if path.is_dir() {
                    if path.file_name().is_some_and(|name| name != "build-info") {
                        pending.push(path);
                    }
                    continue;
                }

                let is_artifact = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(".json") && !name.ends_with(".dbg.json"));

                if !is_artifact {
                    continue;
                }

                if let Some(artifact) = Self::load_hardhat_file(&path)? {
                    artifacts.push(artifact);
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            count = artifacts.len(),
            "Compiled artifacts loaded"
        );

        Ok(artifacts)
    }

    fn load_hardhat_file(path: &Path) -> anyhow::Result<Option<CompiledArtifact>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let artifact: HardhatArtifact = match serde_json::from_str(&content) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::trace!(path = %path.display(), error = %e, "Not a contract artifact, skipping");
                return Ok(None);
            }
        };

        if !artifact.format.starts_with("hh-sol-artifact") {
            tracing::trace!(path = %path.display(), format = artifact.format, "Unknown artifact format, skipping");
            return Ok(None);
        }

        if artifact.bytecode.contains("__$") {
            tracing::warn!(
                contract = artifact.contract_name,
                "Skipping artifact that requires library linking"
            );
            return Ok(None);
        }

        let bytecode = Bytes::from_str(&artifact.bytecode)
            .with_context(|| format!("Invalid bytecode in {}", path.display()))?;

        let build_info = Self::locate_build_info(path)?;

        Ok(Some(CompiledArtifact {
            contract_name: artifact.contract_name,
            source_name: artifact.source_name,
            abi: artifact.abi,
            bytecode,
            build_info,
        }))
    }

    /// Resolve the build info referenced by the `.dbg.json` next to an artifact.
    fn locate_build_info(artifact_path: &Path) -> anyhow::Result<Option<PathBuf>> {
        let dbg_path = artifact_path.with_extension("dbg.json");
        if !dbg_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&dbg_path)
            .with_context(|| format!("Failed to read {}", dbg_path.display()))?;
        let dbg: HardhatDebugFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", dbg_path.display()))?;

        let parent = dbg_path
            .parent()
            .context("Debug file path must have a parent directory")?;

        Ok(Some(parent.join(dbg.build_info)))
    }
}
