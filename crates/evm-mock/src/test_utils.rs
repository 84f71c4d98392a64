//! Hand-assembled contracts and a small in-memory chain for tests.

use crate::{
    config::SandboxConfig,
    evm::{
        EvmEnv,
        build_eth_evm,
    },
    inspector::MockInspector,
    interface::InterfaceSpec,
    primitives::{
        AccountInfo,
        Address,
        Bytes,
        EvmExecutionResult,
        TxEnv,
        TxKind,
        U256,
        address,
    },
    storage::{
        StorageLayout,
        account_with_code,
    },
};
use alloy_json_abi::Function;
use revm::{
    DatabaseCommit,
    InspectEvm,
    database::InMemoryDB,
};

/// This gets invoked before any tests, when the cargo test framework loads the test library.
/// Set `TEST_TRACE` to a level to see tracing output.
#[ctor::ctor]
fn init_tests() {
    use tracing_subscriber::{
        filter::filter_fn,
        prelude::*,
    };
    if let Ok(v) = std::env::var("TEST_TRACE") {
        let level = match v.as_str() {
            "false" | "off" => return,
            "true" | "debug" | "on" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => return,
        };

        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter_fn(move |metadata| {
                metadata.level() <= &level && metadata.target().starts_with("evm-mock")
            }))
            .try_init();
    }
}

pub const CALLER: Address = address!("00000000000000000000000000000000000c0ffe");

pub const COUNTER_SIGNATURES: [&str; 2] = [
    "function count() view returns (uint256)",
    "function add(uint256 amount)",
];

pub const COUNTER_LAYOUT: &str = r#"{
    "storage": [{"label": "count", "offset": 0, "slot": "0", "type": "t_uint256"}],
    "types": {"t_uint256": {"encoding": "inplace", "label": "uint256", "numberOfBytes": "32"}}
}"#;

pub fn counter_interface() -> InterfaceSpec {
    InterfaceSpec::from_signatures(COUNTER_SIGNATURES).expect("counter signatures parse")
}

pub fn counter_layout() -> StorageLayout {
    StorageLayout::from_json(COUNTER_LAYOUT).expect("counter layout parses")
}

fn selector(signature: &str) -> [u8; 4] {
    Function::parse(signature)
        .expect("valid signature")
        .selector()
        .0
}

/// Runtime code of a counter: `count()` returns slot 0, `add(uint256)` adds to it.
/// Any other call data reverts.
pub fn counter_code() -> Bytes {
    let mut code = vec![0x60, 0x00, 0x35, 0x60, 0xe0, 0x1c];
    code.extend([0x80, 0x63]);
    code.extend(selector(COUNTER_SIGNATURES[0]));
    code.extend([0x14, 0x60, 0x1e, 0x57]);
    code.extend([0x80, 0x63]);
    code.extend(selector(COUNTER_SIGNATURES[1]));
    code.extend([0x14, 0x60, 0x2a, 0x57]);
    code.extend([0x60, 0x00, 0x80, 0xfd]);
    // count()
    code.extend([
        0x5b, 0x60, 0x00, 0x54, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
    ]);
    // add(uint256)
    code.extend([0x5b, 0x60, 0x04, 0x35, 0x60, 0x00, 0x54, 0x01, 0x60, 0x00, 0x55, 0x00]);
    code.into()
}

/// Runtime code forwarding its call data to `target` and returning the first word of
/// the reply. Reverts when the inner call fails.
pub fn proxy_code(target: Address, delegate: bool) -> Bytes {
    // copy call data to memory 0, reply into memory 0..32
    let mut code = vec![
        0x36, 0x60, 0x00, 0x60, 0x00, 0x37, 0x60, 0x20, 0x60, 0x00, 0x36, 0x60, 0x00,
    ];
    if !delegate {
        // value
        code.extend([0x60, 0x00]);
    }
    code.push(0x73);
    code.extend_from_slice(target.as_slice());
    code.extend([0x5a, if delegate { 0xf4 } else { 0xf1 }]);

    let revert = code.len() + 9;
    code.extend([0x15, 0x60, revert as u8, 0x57, 0x60, 0x20, 0x60, 0x00, 0xf3]);
    code.extend([0x5b, 0x60, 0x00, 0x80, 0xfd]);
    code.into()
}

pub fn random_address() -> Address {
    Address::from(rand::random::<[u8; 20]>())
}

/// In-memory chain with a funded caller. State is committed after every transaction.
pub struct TestChain {
    pub db: InMemoryDB,
    pub env: EvmEnv,
    pub caller: Address,
    nonce: u64,
}

impl TestChain {
    pub const TX_GAS_LIMIT: u64 = 1_000_000;

    pub fn new(config: &SandboxConfig) -> Self {
        let mut db = InMemoryDB::default();
        db.insert_account_info(
            CALLER,
            AccountInfo {
                balance: U256::from(10).pow(U256::from(24)),
                ..Default::default()
            },
        );
        Self {
            db,
            env: EvmEnv::from(config),
            caller: CALLER,
            nonce: 0,
        }
    }

    pub fn deploy(&mut self, address: Address, code: Bytes) {
        self.db.insert_account_info(address, account_with_code(code));
    }

    pub fn call(
        &mut self,
        inspector: &mut MockInspector,
        to: Address,
        data: impl Into<Bytes>,
    ) -> EvmExecutionResult {
        self.call_with_value(inspector, to, data, U256::ZERO)
    }

    pub fn call_with_value(
        &mut self,
        inspector: &mut MockInspector,
        to: Address,
        data: impl Into<Bytes>,
        value: U256,
    ) -> EvmExecutionResult {
        let tx_env = TxEnv {
            caller: self.caller,
            kind: TxKind::Call(to),
            data: data.into(),
            value,
            gas_limit: Self::TX_GAS_LIMIT,
            nonce: self.nonce,
            chain_id: Some(self.env.cfg_env.chain_id),
            ..Default::default()
        };

        let mut evm = build_eth_evm(&mut self.db, &self.env, &mut *inspector);
        let result_and_state = evm.inspect_tx(tx_env).expect("transaction executes");
        drop(evm);

        self.db.commit(result_and_state.state);
        self.nonce += 1;
        result_and_state.result
    }
}
