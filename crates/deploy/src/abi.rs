//! Calldata for constructors, initializers and proxy upgrades.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::{Function, Param},
    primitives::{Address, B256, Bytes, b256, keccak256},
};

use crate::{AddressLedger, ArgValue, ArtifactSpec, CompiledArtifact, DeployError};

/// ERC-1967 storage slot holding the implementation address of a proxy.
pub const IMPLEMENTATION_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// UUPS upgrade entry point, called on the proxy itself.
pub const UPGRADE_TO_AND_CALL: &str = "upgradeToAndCall(address,bytes)";

/// Transparent proxy upgrade entry point, called on the `ProxyAdmin`.
pub const ADMIN_UPGRADE_AND_CALL: &str = "upgradeAndCall(address,address,bytes)";

fn invalid(artifact: &str, reason: impl ToString) -> DeployError {
    DeployError::InvalidArguments {
        artifact: artifact.to_string(),
        reason: reason.to_string(),
    }
}

/// Coerce configured arguments into the parameter types of an interface entry.
fn coerce_args(
    artifact: &str,
    params: &[Param],
    args: &[ArgValue],
    ledger: &AddressLedger,
) -> Result<Vec<DynSolValue>, DeployError> {
    if params.len() != args.len() {
        return Err(invalid(
            artifact,
            format!("expected {} arguments, got {}", params.len(), args.len()),
        ));
    }

    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty: DynSolType = param
                .resolve()
                .map_err(|e| invalid(artifact, format!("parameter `{}`: {e}", param.name)))?;
            let text = arg.render(ledger)?;
            ty.coerce_str(&text).map_err(|e| {
                invalid(
                    artifact,
                    format!("`{text}` is not a valid {} for `{}`: {e}", param.ty, param.name),
                )
            })
        })
        .collect()
}

/// ABI-encoded constructor arguments, without the creation bytecode.
pub fn constructor_args(
    artifact: &str,
    compiled: &CompiledArtifact,
    args: &[ArgValue],
    ledger: &AddressLedger,
) -> Result<Bytes, DeployError> {
    let Some(constructor) = &compiled.abi.constructor else {
        if args.is_empty() {
            return Ok(Bytes::new());
        }
        return Err(invalid(
            artifact,
            format!("`{}` has no constructor", compiled.contract_name),
        ));
    };

    let values = coerce_args(artifact, &constructor.inputs, args, ledger)?;
    constructor
        .abi_encode_input(&values)
        .map(Bytes::from)
        .map_err(|e| invalid(artifact, e))
}

/// Contract creation data: bytecode followed by the encoded constructor arguments.
pub fn creation_data(compiled: &CompiledArtifact, constructor_args: &Bytes) -> Result<Bytes, DeployError> {
    if compiled.bytecode.is_empty() {
        return Err(DeployError::EmptyBytecode(compiled.contract_name.clone()));
    }

    let mut data = compiled.bytecode.to_vec();
    data.extend_from_slice(constructor_args);
    Ok(data.into())
}

/// Calldata for the initializer of an upgradeable artifact.
///
/// Empty when the artifact declares neither an initializer nor arguments.
pub fn initializer_call(
    spec: &ArtifactSpec,
    compiled: &CompiledArtifact,
    ledger: &AddressLedger,
) -> Result<Bytes, DeployError> {
    let Some(initializer) = spec.initializer.as_deref() else {
        if spec.args.is_empty() {
            return Ok(Bytes::new());
        }
        return Err(invalid(
            &spec.name,
            "arguments given but no initializer declared",
        ));
    };

    function_call(&spec.name, compiled, initializer, &spec.args, ledger)
}

/// Calldata for `function`, given by name or full signature.
///
/// A bare name is looked up in the contract ABI, picking the overload that
/// takes as many arguments as given.
pub fn function_call(
    artifact: &str,
    compiled: &CompiledArtifact,
    function: &str,
    args: &[ArgValue],
    ledger: &AddressLedger,
) -> Result<Bytes, DeployError> {
    let function = if function.contains('(') {
        Function::parse(function)
            .map_err(|e| invalid(artifact, format!("bad function `{function}`: {e}")))?
    } else {
        compiled
            .abi
            .function(function)
            .and_then(|overloads| {
                overloads
                    .iter()
                    .find(|overload| overload.inputs.len() == args.len())
            })
            .cloned()
            .ok_or_else(|| {
                invalid(
                    artifact,
                    format!(
                        "`{}` has no `{function}` taking {} arguments",
                        compiled.contract_name,
                        args.len()
                    ),
                )
            })?
    };

    let values = coerce_args(artifact, &function.inputs, args, ledger)?;
    function
        .abi_encode_input(&values)
        .map(Bytes::from)
        .map_err(|e| invalid(artifact, e))
}

/// Constructor arguments of an ERC-1967 style proxy: `(implementation, data)`.
pub fn proxy_constructor_args(
    proxy: &CompiledArtifact,
    implementation: Address,
    init_data: Bytes,
) -> Result<Bytes, DeployError> {
    let values = [
        DynSolValue::Address(implementation),
        DynSolValue::Bytes(init_data.to_vec()),
    ];

    let constructor = proxy.abi.constructor.as_ref().ok_or_else(|| {
        invalid(
            &proxy.contract_name,
            "proxy contract has no `(address,bytes)` constructor",
        )
    })?;

    constructor
        .abi_encode_input(&values)
        .map(Bytes::from)
        .map_err(|e| invalid(&proxy.contract_name, e))
}

/// Encode a call from a canonical signature and already typed values.
fn encode_call(signature: &str, values: Vec<DynSolValue>) -> Bytes {
    let mut data = keccak256(signature.as_bytes())[..4].to_vec();
    data.extend(DynSolValue::Tuple(values).abi_encode_params());
    data.into()
}

/// `upgradeToAndCall(implementation, data)` on a UUPS proxy.
pub fn upgrade_to_and_call(implementation: Address, data: Bytes) -> Bytes {
    encode_call(
        UPGRADE_TO_AND_CALL,
        vec![
            DynSolValue::Address(implementation),
            DynSolValue::Bytes(data.to_vec()),
        ],
    )
}

/// `upgradeAndCall(proxy, implementation, data)` on a `ProxyAdmin`.
pub fn admin_upgrade_and_call(proxy: Address, implementation: Address, data: Bytes) -> Bytes {
    encode_call(
        ADMIN_UPGRADE_AND_CALL,
        vec![
            DynSolValue::Address(proxy),
            DynSolValue::Address(implementation),
            DynSolValue::Bytes(data.to_vec()),
        ],
    )
}

/// Extract an address from a 32-byte storage word.
pub fn address_from_word(word: B256) -> Address {
    Address::from_word(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::hex;

    const SWAP_ABI: &str = r#"[
        {"type":"constructor","stateMutability":"nonpayable","inputs":[
            {"name":"token","type":"address"},
            {"name":"nft","type":"address"},
            {"name":"fee","type":"uint256"}
        ]},
        {"type":"function","name":"initialize","stateMutability":"nonpayable","outputs":[],"inputs":[
            {"name":"owner","type":"address"}
        ]}
    ]"#;

    fn swap() -> CompiledArtifact {
        CompiledArtifact::new(
            "Swap",
            "contracts/Swap.sol",
            serde_json::from_str(SWAP_ABI).unwrap(),
            Bytes::from_static(&[0xfe]),
        )
    }

    fn ledger() -> AddressLedger {
        let mut ledger = AddressLedger::new();
        ledger.set("TokenA", Address::repeat_byte(0x11)).unwrap();
        ledger.set("Nft", Address::repeat_byte(0x22)).unwrap();
        ledger
    }

    #[test]
    fn test_constructor_args_substitute_ledger_addresses() {
        let args = vec![
            ArgValue::reference("TokenA"),
            ArgValue::reference("Nft"),
            ArgValue::text("1000"),
        ];
        let encoded = constructor_args("Swap", &swap(), &args, &ledger()).unwrap();

        assert_eq!(encoded.len(), 96);
        assert_eq!(&encoded[12..32], Address::repeat_byte(0x11).as_slice());
        assert_eq!(&encoded[44..64], Address::repeat_byte(0x22).as_slice());
        assert_eq!(encoded[95], 0xe8);
        assert_eq!(encoded[94], 0x03);
    }

    #[test]
    fn test_constructor_args_count_mismatch() {
        let err = constructor_args("Swap", &swap(), &[ArgValue::Int(1)], &ledger()).unwrap_err();
        assert!(matches!(err, DeployError::InvalidArguments { artifact, .. } if artifact == "Swap"));
    }

    #[test]
    fn test_constructor_args_bad_literal() {
        let args = vec![
            ArgValue::text("not-an-address"),
            ArgValue::reference("Nft"),
            ArgValue::Int(1),
        ];
        let err = constructor_args("Swap", &swap(), &args, &ledger()).unwrap_err();
        assert!(matches!(err, DeployError::InvalidArguments { .. }));
    }

    #[test]
    fn test_creation_data_appends_arguments() {
        let data = creation_data(&swap(), &Bytes::from_static(&[0x01, 0x02])).unwrap();
        assert_eq!(data, Bytes::from_static(&[0xfe, 0x01, 0x02]));
    }

    #[test]
    fn test_creation_data_rejects_interfaces() {
        let mut interface = swap();
        interface.bytecode = Bytes::new();
        assert!(matches!(
            creation_data(&interface, &Bytes::new()),
            Err(DeployError::EmptyBytecode(_))
        ));
    }

    #[test]
    fn test_initializer_by_name_and_signature() {
        let by_name = ArtifactSpec::upgradeable(
            "Swap",
            Some("initialize"),
            vec![ArgValue::reference("TokenA")],
        );
        let by_signature = ArtifactSpec::upgradeable(
            "Swap",
            Some("initialize(address)"),
            vec![ArgValue::reference("TokenA")],
        );

        let a = initializer_call(&by_name, &swap(), &ledger()).unwrap();
        let b = initializer_call(&by_signature, &swap(), &ledger()).unwrap();

        assert_eq!(a, b);
        assert_eq!(&a[..4], &keccak256("initialize(address)")[..4]);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_initializer_missing() {
        let spec = ArtifactSpec::upgradeable("Swap", None, vec![ArgValue::Int(1)]);
        assert!(initializer_call(&spec, &swap(), &ledger()).is_err());

        let empty = ArtifactSpec::upgradeable("Swap", None, vec![]);
        assert!(initializer_call(&empty, &swap(), &ledger()).unwrap().is_empty());
    }

    #[test]
    fn test_function_call_unknown_overload() {
        let err = function_call(
            "Swap",
            &swap(),
            "initialize",
            &[ArgValue::reference("TokenA"), ArgValue::Int(1)],
            &ledger(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no `initialize` taking 2 arguments"));
    }

    #[test]
    fn test_upgrade_to_and_call_selector() {
        let data = upgrade_to_and_call(Address::repeat_byte(0x33), Bytes::new());
        // keccak256("upgradeToAndCall(address,bytes)")[..4]
        assert_eq!(hex::encode(&data[..4]), "4f1ef286");
        assert_eq!(&data[16..36], Address::repeat_byte(0x33).as_slice());
    }

    #[test]
    fn test_address_from_word() {
        let address = Address::repeat_byte(0x44);
        assert_eq!(address_from_word(address.into_word()), address);
    }
}
