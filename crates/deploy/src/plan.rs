//! The step plan: an ordered, flag-gated list of deploy and upgrade steps.

use alloy_core::primitives::{Address, Bytes};
use derive_more::Deref;
use serde::{Deserialize, Serialize};

use crate::{
    AddressLedger, ArgValue, ArtifactKind, ArtifactRegistry, ArtifactSpec, CompiledArtifact,
    DeployError, StepError, abi,
};

fn default_true() -> bool {
    true
}

/// A function called on the proxy in the same transaction as an upgrade,
/// usually a reinitializer of the new implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeCall {
    /// Function name or full signature, e.g. `initializeV2(uint256)`.
    pub function: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgValue>,
}

impl UpgradeCall {
    pub fn new(function: impl Into<String>, args: Vec<ArgValue>) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }

    /// Calldata against the new implementation's interface.
    pub fn encode(
        &self,
        artifact: &str,
        compiled: &CompiledArtifact,
        ledger: &AddressLedger,
    ) -> Result<Bytes, DeployError> {
        abi::function_call(artifact, compiled, &self.function, &self.args, ledger)
    }
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Deploy an artifact and record its address under the artifact name.
    Deploy { artifact: String },
    /// Point an existing proxy at a new implementation.
    #[serde(alias = "upgrade")]
    UpgradeProxy {
        /// Ledger name of the proxy.
        target: String,
        /// Artifact providing the new implementation.
        artifact: String,
        /// Ledger name of a `ProxyAdmin` for transparent proxies.
        /// When absent the proxy is upgraded through its own UUPS entry point.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        admin: Option<String>,
        /// Called through the upgrade. The artifact's initializer is never
        /// sent again, so without this the upgrade carries no call.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call: Option<UpgradeCall>,
    },
}

/// One entry of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// Disabled steps are skipped without side effects.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub action: StepAction,
    /// Ledger names that must be resolved before the step runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Submit the contracts created by this step to source verification.
    #[serde(default = "default_true")]
    pub verify: bool,
}

impl Step {
    pub fn deploy(id: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            action: StepAction::Deploy {
                artifact: artifact.into(),
            },
            depends_on: Vec::new(),
            verify: true,
        }
    }

    pub fn upgrade(
        id: impl Into<String>,
        target: impl Into<String>,
        artifact: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            action: StepAction::UpgradeProxy {
                target: target.into(),
                artifact: artifact.into(),
                admin: None,
                call: None,
            },
            depends_on: Vec::new(),
            verify: true,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(names.into_iter().map(Into::into));
        self
    }

    /// Upgrade through a `ProxyAdmin` instead of the proxy itself.
    pub fn via_admin(mut self, admin_name: impl Into<String>) -> Self {
        if let StepAction::UpgradeProxy { admin, .. } = &mut self.action {
            *admin = Some(admin_name.into());
        }
        self
    }

    /// Call `function` on the proxy as part of the upgrade.
    pub fn with_call(mut self, function: impl Into<String>, args: Vec<ArgValue>) -> Self {
        if let StepAction::UpgradeProxy { call, .. } = &mut self.action {
            *call = Some(UpgradeCall::new(function, args));
        }
        self
    }

    /// The artifact this step deploys (the new implementation for upgrades).
    pub fn artifact(&self) -> &str {
        match &self.action {
            StepAction::Deploy { artifact } | StepAction::UpgradeProxy { artifact, .. } => {
                artifact
            }
        }
    }

    /// The ledger name this step writes, if any.
    pub fn produces(&self) -> Option<&str> {
        match &self.action {
            StepAction::Deploy { artifact } => Some(artifact),
            StepAction::UpgradeProxy { .. } => None,
        }
    }

    /// Every ledger name the step reads: declared dependencies, names
    /// referenced by the deployed artifact's arguments, and for upgrades the
    /// target, the admin and the names referenced by the upgrade call.
    pub fn dependencies(&self, spec: &ArtifactSpec) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !names.iter().any(|known| known == name) {
                names.push(name.to_string());
            }
        };

        self.depends_on.iter().for_each(|name| push(name.as_str()));

        match &self.action {
            StepAction::Deploy { .. } => spec.references().into_iter().for_each(&mut push),
            StepAction::UpgradeProxy {
                target,
                admin,
                call,
                ..
            } => {
                push(target.as_str());
                if let Some(admin) = admin {
                    push(admin.as_str());
                }
                if let Some(call) = call {
                    call.args
                        .iter()
                        .flat_map(ArgValue::references)
                        .for_each(&mut push);
                }
            }
        }

        names
    }

    /// Resolve the step's artifact and check it fits the action.
    pub fn resolve<'r>(&self, registry: &'r ArtifactRegistry) -> Result<&'r ArtifactSpec, DeployError> {
        let spec = registry.resolve(self.artifact())?;
        if matches!(self.action, StepAction::UpgradeProxy { .. })
            && spec.kind != ArtifactKind::UpgradeableProxy
        {
            return Err(DeployError::NotUpgradeable(spec.name.clone()));
        }
        Ok(spec)
    }

    /// Build every payload the step would send, without sending anything.
    ///
    /// Names produced earlier in the plan may stand in the ledger as
    /// [`Address::ZERO`]: only argument shapes and literals are checked.
    fn rehearse(
        &self,
        spec: &ArtifactSpec,
        registry: &ArtifactRegistry,
        ledger: &AddressLedger,
    ) -> Result<(), DeployError> {
        let compiled = registry.compiled(&spec.contract)?;

        match (&self.action, spec.kind) {
            (StepAction::Deploy { .. }, ArtifactKind::Plain) => {
                let args = abi::constructor_args(&spec.name, compiled, &spec.args, ledger)?;
                abi::creation_data(compiled, &args)?;
            }
            (StepAction::Deploy { .. }, ArtifactKind::UpgradeableProxy) => {
                let init_data = abi::initializer_call(spec, compiled, ledger)?;
                abi::creation_data(compiled, &Bytes::new())?;

                let proxy = registry.proxy()?;
                let proxy_args = abi::proxy_constructor_args(proxy, Address::ZERO, init_data)?;
                abi::creation_data(proxy, &proxy_args)?;
            }
            (StepAction::UpgradeProxy { call, .. }, _) => {
                abi::creation_data(compiled, &Bytes::new())?;
                if let Some(call) = call {
                    call.encode(&spec.name, compiled, ledger)?;
                }
            }
        }

        Ok(())
    }
}

/// The manually ordered list of steps for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref)]
#[serde(transparent)]
pub struct StepPlan {
    steps: Vec<Step>,
}

impl StepPlan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn enabled_count(&self) -> usize {
        self.steps.iter().filter(|step| step.enabled).count()
    }

    /// Dry-run the plan against the registry and a seeded ledger.
    ///
    /// Walks the enabled steps in order, tracking which names would be
    /// resolved and encoding every constructor, initializer and upgrade call,
    /// and reports the first configuration error without touching the
    /// network.
    pub fn check(&self, registry: &ArtifactRegistry, ledger: &AddressLedger) -> Result<(), StepError> {
        let mut scratch = ledger.clone();

        for step in self.steps.iter().filter(|step| step.enabled) {
            let fail = |error| StepError::new(step.id.clone(), error);

            let spec = step.resolve(registry).map_err(fail)?;

            if let Some(missing) = step
                .dependencies(spec)
                .into_iter()
                .find(|name| !scratch.contains(name))
            {
                return Err(fail(DeployError::UnresolvedDependency(missing)));
            }

            step.rehearse(spec, registry, &scratch).map_err(fail)?;

            if let Some(name) = step.produces() {
                scratch.set(name, Address::ZERO).map_err(fail)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::json_abi::JsonAbi;

    use super::*;
    use crate::CompiledArtifact;

    const SWAP_ABI: &str = r#"[
        {"type":"constructor","stateMutability":"nonpayable","inputs":[{"name":"token","type":"address"}]}
    ]"#;

    const SWAP_V2_ABI: &str = r#"[
        {"type":"function","name":"initialize","stateMutability":"nonpayable","outputs":[],"inputs":[{"name":"token","type":"address"}]},
        {"type":"function","name":"initializeV2","stateMutability":"nonpayable","outputs":[],"inputs":[{"name":"fee","type":"uint256"}]}
    ]"#;

    const PROXY_ABI: &str = r#"[
        {"type":"constructor","stateMutability":"payable","inputs":[
            {"name":"implementation","type":"address"},
            {"name":"data","type":"bytes"}
        ]}
    ]"#;

    fn compiled(name: &str, abi: &str) -> CompiledArtifact {
        CompiledArtifact::new(
            name,
            format!("contracts/{name}.sol"),
            serde_json::from_str::<JsonAbi>(abi).unwrap(),
            Bytes::from_static(&[0x60]),
        )
    }

    fn registry() -> ArtifactRegistry {
        ArtifactRegistry::default()
            .with_compiled([
                compiled("TokenA", "[]"),
                compiled("Swap", SWAP_ABI),
                compiled("SwapV2", SWAP_V2_ABI),
                compiled("ERC1967Proxy", PROXY_ABI),
            ])
            .with_spec(ArtifactSpec::plain("TokenA", vec![]))
            .and_then(|r| r.with_spec(ArtifactSpec::plain("Swap", vec![ArgValue::reference("TokenA")])))
            .and_then(|r| r.with_spec(ArtifactSpec::upgradeable("SwapV2", None, vec![])))
            .unwrap()
    }

    #[test]
    fn test_step_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            steps: Vec<Step>,
        }

        let holder: Holder = toml::from_str(
            r#"
            [[steps]]
            id = "token"
            action = "deploy"
            artifact = "TokenA"

            [[steps]]
            id = "upgrade-swap"
            action = "upgrade_proxy"
            target = "Swap"
            artifact = "SwapV2"
            admin = "ProxyAdmin"
            enabled = false
            verify = false
            "#,
        )
        .unwrap();

        assert_eq!(holder.steps[0], Step::deploy("token", "TokenA"));
        assert_eq!(
            holder.steps[1],
            Step::upgrade("upgrade-swap", "Swap", "SwapV2")
                .via_admin("ProxyAdmin")
                .enabled(false)
                .verify(false)
        );
    }

    #[test]
    fn test_upgrade_alias() {
        let step: Step = toml::from_str(
            r#"
            id = "u"
            action = "upgrade"
            target = "Swap"
            artifact = "SwapV2"
            "#,
        )
        .unwrap();
        assert_eq!(step, Step::upgrade("u", "Swap", "SwapV2"));
    }

    #[test]
    fn test_dependencies_merge_references_and_target() {
        let registry = registry();
        let deploy = Step::deploy("swap", "Swap").depends_on(["Extra", "TokenA"]);
        assert_eq!(
            deploy.dependencies(registry.resolve("Swap").unwrap()),
            vec!["Extra", "TokenA"]
        );

        let upgrade = Step::upgrade("u", "Swap", "SwapV2").via_admin("Admin");
        assert_eq!(
            upgrade.dependencies(registry.resolve("SwapV2").unwrap()),
            vec!["Swap", "Admin"]
        );
    }

    #[test]
    fn test_check_accepts_ordered_plan() {
        let plan = StepPlan::new(vec![
            Step::deploy("token", "TokenA"),
            Step::deploy("swap", "Swap"),
            Step::upgrade("upgrade", "Swap", "SwapV2"),
        ]);
        assert!(plan.check(&registry(), &AddressLedger::new()).is_ok());
    }

    #[test]
    fn test_check_reports_missing_dependency() {
        let plan = StepPlan::new(vec![
            Step::deploy("token", "TokenA").enabled(false),
            Step::deploy("swap", "Swap"),
        ]);
        let err = plan.check(&registry(), &AddressLedger::new()).unwrap_err();

        assert_eq!(err.step_id, "swap");
        assert!(matches!(err.error, DeployError::UnresolvedDependency(name) if name == "TokenA"));
    }

    #[test]
    fn test_check_uses_seeded_ledger() {
        let mut ledger = AddressLedger::new();
        ledger.seed([("TokenA", Address::repeat_byte(1))]).unwrap();

        let plan = StepPlan::new(vec![
            Step::deploy("token", "TokenA").enabled(false),
            Step::deploy("swap", "Swap"),
        ]);
        assert!(plan.check(&registry(), &ledger).is_ok());
    }

    #[test]
    fn test_check_reports_duplicate_deploy() {
        let plan = StepPlan::new(vec![
            Step::deploy("first", "TokenA"),
            Step::deploy("second", "TokenA"),
        ]);
        let err = plan.check(&registry(), &AddressLedger::new()).unwrap_err();

        assert_eq!(err.step_id, "second");
        assert!(matches!(err.error, DeployError::DuplicateAssignment(name) if name == "TokenA"));
    }

    #[test]
    fn test_check_rejects_plain_upgrade_target() {
        let plan = StepPlan::new(vec![
            Step::deploy("token", "TokenA"),
            Step::deploy("swap", "Swap"),
            Step::upgrade("upgrade", "Swap", "TokenA"),
        ]);
        let err = plan.check(&registry(), &AddressLedger::new()).unwrap_err();

        assert_eq!(err.step_id, "upgrade");
        assert!(matches!(err.error, DeployError::NotUpgradeable(_)));
    }

    #[test]
    fn test_upgrade_call_from_toml() {
        let step: Step = toml::from_str(
            r#"
            id = "u"
            action = "upgrade_proxy"
            target = "Swap"
            artifact = "SwapV2"
            call = { function = "initializeV2", args = [30] }
            "#,
        )
        .unwrap();
        assert_eq!(
            step,
            Step::upgrade("u", "Swap", "SwapV2").with_call("initializeV2", vec![ArgValue::Int(30)])
        );
    }

    #[test]
    fn test_upgrade_ignores_initializer_references() {
        let registry = registry().with_spec(ArtifactSpec::upgradeable(
            "SwapV2",
            Some("initialize"),
            vec![ArgValue::reference("TokenA")],
        ))
        .unwrap();
        let spec = registry.resolve("SwapV2").unwrap();

        let upgrade = Step::upgrade("u", "Swap", "SwapV2");
        assert_eq!(upgrade.dependencies(spec), vec!["Swap"]);

        let with_call = upgrade.with_call("initialize", vec![ArgValue::reference("Fee")]);
        assert_eq!(with_call.dependencies(spec), vec!["Swap", "Fee"]);
    }

    #[test]
    fn test_check_rejects_wrong_argument_count_before_earlier_steps_run() {
        let registry = registry()
            .with_spec(ArtifactSpec::plain("Swap", vec![]))
            .unwrap();
        let plan = StepPlan::new(vec![
            Step::deploy("token", "TokenA"),
            Step::deploy("swap", "Swap"),
        ]);
        let err = plan.check(&registry, &AddressLedger::new()).unwrap_err();

        assert_eq!(err.step_id, "swap");
        assert!(matches!(
            err.error,
            DeployError::InvalidArguments { ref reason, .. } if reason == "expected 1 arguments, got 0"
        ));
    }

    #[test]
    fn test_check_rejects_bad_literal() {
        let registry = registry()
            .with_spec(ArtifactSpec::plain("Swap", vec![ArgValue::text("not-an-address")]))
            .unwrap();
        let plan = StepPlan::new(vec![Step::deploy("swap", "Swap")]);
        let err = plan.check(&registry, &AddressLedger::new()).unwrap_err();

        assert!(matches!(err.error, DeployError::InvalidArguments { .. }));
    }

    #[test]
    fn test_check_rejects_empty_bytecode() {
        let mut interface = compiled("IToken", "[]");
        interface.bytecode = Bytes::new();
        let registry = registry()
            .with_compiled([interface])
            .with_spec(ArtifactSpec::plain("IToken", vec![]))
            .unwrap();

        let plan = StepPlan::new(vec![Step::deploy("token", "IToken")]);
        let err = plan.check(&registry, &AddressLedger::new()).unwrap_err();
        assert!(matches!(err.error, DeployError::EmptyBytecode(name) if name == "IToken"));
    }

    #[test]
    fn test_check_rejects_proxy_without_constructor() {
        let registry = ArtifactRegistry::default()
            .with_compiled([compiled("SwapV2", SWAP_V2_ABI), compiled("ERC1967Proxy", "[]")])
            .with_spec(ArtifactSpec::upgradeable("SwapV2", None, vec![]))
            .unwrap();

        let plan = StepPlan::new(vec![Step::deploy("swap", "SwapV2")]);
        let err = plan.check(&registry, &AddressLedger::new()).unwrap_err();
        assert!(matches!(err.error, DeployError::InvalidArguments { artifact, .. } if artifact == "ERC1967Proxy"));
    }

    #[test]
    fn test_check_encodes_upgrade_call() {
        let plan = StepPlan::new(vec![
            Step::deploy("token", "TokenA"),
            Step::deploy("swap", "Swap"),
            Step::upgrade("upgrade", "Swap", "SwapV2").with_call("initializeV2", vec![ArgValue::Int(30)]),
        ]);
        assert!(plan.check(&registry(), &AddressLedger::new()).is_ok());

        let bad = StepPlan::new(vec![
            Step::deploy("token", "TokenA"),
            Step::deploy("swap", "Swap"),
            Step::upgrade("upgrade", "Swap", "SwapV2").with_call("migrate", vec![]),
        ]);
        let err = bad.check(&registry(), &AddressLedger::new()).unwrap_err();
        assert_eq!(err.step_id, "upgrade");
        assert!(matches!(err.error, DeployError::InvalidArguments { .. }));
    }

    #[test]
    fn test_check_unknown_artifact() {
        let plan = StepPlan::new(vec![Step::deploy("nft", "PlutusNFT")]);
        let err = plan.check(&registry(), &AddressLedger::new()).unwrap_err();
        assert!(matches!(err.error, DeployError::UnknownArtifact(name) if name == "PlutusNFT"));
    }
}
