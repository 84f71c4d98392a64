use crate::primitives::{
    Bytes,
    SpecId,
    bytes,
};

/// Contains the configuration for a [`Sandbox`](crate::Sandbox) and the EVMs built from it.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub spec_id: SpecId,
    pub chain_id: u64,
    /// Gas limit used for transactions sent through [`evm`](crate::evm) helpers.
    pub gas_limit: u64,
    /// Placeholder code written into fake addresses so callers see a contract.
    pub fake_code: Bytes,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            spec_id: SpecId::default(),
            chain_id: 1,
            gas_limit: 30_000_000,
            fake_code: bytes!("00"),
        }
    }
}

impl SandboxConfig {
    /// Set the evm [`SpecId`]
    pub fn with_spec_id(mut self, spec_id: SpecId) -> Self {
        self.spec_id = spec_id;
        self
    }

    /// Set the chain id
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Set the transaction gas limit
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Set the code written into fake contract addresses
    pub fn with_fake_code(mut self, fake_code: Bytes) -> Self {
        self.fake_code = fake_code;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_override_defaults() {
        let config = SandboxConfig::default()
            .with_chain_id(31337)
            .with_gas_limit(1_000_000)
            .with_spec_id(SpecId::SHANGHAI)
            .with_fake_code(bytes!("fe"));

        assert_eq!(config.chain_id, 31337);
        assert_eq!(config.gas_limit, 1_000_000);
        assert_eq!(config.spec_id, SpecId::SHANGHAI);
        assert_eq!(config.fake_code, bytes!("fe"));
    }

    #[test]
    fn test_default_fake_code_is_single_stop() {
        assert_eq!(SandboxConfig::default().fake_code.as_ref(), &[0x00]);
    }
}
