//! EVM construction for running transactions against fakes and mocks.

use crate::{
    config::SandboxConfig,
    primitives::{
        BlockEnv,
        CfgEnv,
        SpecId,
        TxEnv,
    },
};
use revm::{
    Context,
    Database,
    Inspector,
    MainnetEvm,
    context::{
        Evm,
        Journal,
        JournalTr,
        LocalContext,
    },
    handler::{
        EthFrame,
        EthPrecompiles,
        instructions::EthInstructions,
    },
    interpreter::interpreter::EthInterpreter,
    precompile::{
        PrecompileSpecId,
        Precompiles,
    },
};

/// Configuration and block environment of an EVM.
#[derive(Debug, Clone, Default)]
pub struct EvmEnv {
    pub cfg_env: CfgEnv<SpecId>,
    pub block_env: BlockEnv,
}

/// Builds an EVM environment for `chain_id` and `spec_id`.
pub fn evm_env(chain_id: u64, spec_id: SpecId, block_env: BlockEnv) -> EvmEnv {
    let mut cfg_env = CfgEnv::default();
    cfg_env.chain_id = chain_id;
    cfg_env.spec = spec_id;
    EvmEnv { cfg_env, block_env }
}

impl From<&SandboxConfig> for EvmEnv {
    fn from(config: &SandboxConfig) -> Self {
        let block_env = BlockEnv {
            gas_limit: config.gas_limit,
            ..Default::default()
        };
        evm_env(config.chain_id, config.spec_id, block_env)
    }
}

pub type EthCtx<'db, DB> =
    Context<BlockEnv, TxEnv, CfgEnv<SpecId>, &'db mut DB, Journal<&'db mut DB>, ()>;
pub type EthIns<'db, DB> = EthInstructions<EthInterpreter, EthCtx<'db, DB>>;
pub type EthEvm<'db, DB, I> = Evm<EthCtx<'db, DB>, I, EthIns<'db, DB>, EthPrecompiles, EthFrame>;

/// Builds a mainnet Ethereum EVM over `db`, driven by `inspector`.
///
/// Transactions must be run with `InspectEvm::inspect_tx` for the inspector to see calls.
pub fn build_eth_evm<'db, DB, I>(db: &'db mut DB, env: &EvmEnv, inspector: I) -> EthEvm<'db, DB, I>
where
    DB: Database,
    I: Inspector<EthCtx<'db, DB>>,
{
    let spec = env.cfg_env.spec;
    let context = Context {
        journaled_state: {
            let mut journal = Journal::new(db);
            journal.set_spec_id(spec);
            journal
        },
        block: env.block_env.clone(),
        cfg: env.cfg_env.clone(),
        tx: TxEnv::default(),
        chain: (),
        local: LocalContext::default(),
        error: Ok(()),
    };
    let precompiles = EthPrecompiles {
        precompiles: Precompiles::new(PrecompileSpecId::from_spec_id(spec)),
        spec,
    };

    MainnetEvm::new_with_inspector(context, inspector, EthInstructions::default(), precompiles)
}
