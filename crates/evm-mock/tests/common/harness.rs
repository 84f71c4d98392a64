use alloy_dyn_abi::{
    DynSolValue,
    JsonAbiExt,
};
use alloy_json_abi::Function;
use evm_mock::{
    MockInspector,
    Sandbox,
    SandboxConfig,
    primitives::{
        Bytes,
        EvmExecutionResult,
        U256,
    },
    test_utils::TestChain,
};

/// A sandbox, its inspector and a chain to run transactions on.
pub struct Harness {
    pub sandbox: Sandbox,
    pub inspector: MockInspector,
    pub chain: TestChain,
}

impl Harness {
    pub fn new() -> Self {
        let config = SandboxConfig::default();
        let sandbox = Sandbox::new(config.clone());
        Self {
            inspector: sandbox.inspector(),
            chain: TestChain::new(&config),
            sandbox,
        }
    }

    pub fn call(&mut self, to: evm_mock::primitives::Address, data: Bytes) -> EvmExecutionResult {
        self.chain.call(&mut self.inspector, to, data)
    }
}

pub fn calldata(signature: &str, args: &[DynSolValue]) -> Bytes {
    Function::parse(signature)
        .unwrap()
        .abi_encode_input(args)
        .unwrap()
        .into()
}

pub fn uint(value: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(value), 256)
}

/// Output of a successful or reverted transaction.
pub fn output(result: &EvmExecutionResult) -> Bytes {
    result.output().cloned().unwrap_or_default()
}

/// First returned word of a successful transaction.
pub fn returned_word(result: &EvmExecutionResult) -> U256 {
    assert!(result.is_success(), "transaction failed: {result:?}");
    U256::from_be_slice(&output(result)[..32])
}

pub fn is_revert(result: &EvmExecutionResult) -> bool {
    matches!(result, EvmExecutionResult::Revert { .. })
}
