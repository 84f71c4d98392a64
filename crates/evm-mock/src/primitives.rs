pub use alloy_primitives::{
    Address,
    B256,
    Bytes,
    FixedBytes,
    I256,
    Selector,
    TxKind,
    U256,
    address,
    bytes,
    fixed_bytes,
    hex,
    keccak256,
};

pub use revm::{
    context::{
        BlockEnv,
        CfgEnv,
        TxEnv,
    },
    context_interface::result::{
        ExecutionResult as EvmExecutionResult,
        Output,
        ResultAndState,
    },
    primitives::hardfork::SpecId,
    state::{
        AccountInfo,
        Bytecode,
    },
};
