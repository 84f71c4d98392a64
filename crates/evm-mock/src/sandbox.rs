use crate::{
    config::SandboxConfig,
    contract::{
        FakeContract,
        FunctionSet,
        MockContract,
    },
    error::MockError,
    function::{
        FunctionMode,
        ProgrammableFunction,
        WeakFunction,
    },
    history::NonceSequence,
    inspector::MockInspector,
    interface::InterfaceSpec,
    primitives::Address,
    storage::{
        CodeBackend,
        StorageLayout,
    },
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Options for [`Sandbox::fake`].
#[derive(Debug, Clone, Default)]
pub struct FakeOptions {
    /// Address of the fake. A random one is picked when unset.
    pub address: Option<Address>,
}

impl FakeOptions {
    pub fn at(address: Address) -> Self {
        Self {
            address: Some(address),
        }
    }
}

/// Functions of the fakes and mocks a sandbox created.
///
/// Holds weak handles: once a contract and every handle to its functions are dropped,
/// its calls are no longer intercepted.
#[derive(Debug, Clone, Default)]
pub(crate) struct FunctionRegistry {
    functions: Arc<Mutex<Vec<WeakFunction>>>,
}

impl FunctionRegistry {
    fn register<'a>(&self, functions: impl IntoIterator<Item = &'a ProgrammableFunction>) {
        self.functions
            .lock()
            .extend(functions.into_iter().map(ProgrammableFunction::downgrade));
    }

    /// Functions still alive, in registration order. Dropped ones are pruned.
    pub(crate) fn live(&self) -> Vec<ProgrammableFunction> {
        let mut functions = self.functions.lock();
        let mut live = Vec::with_capacity(functions.len());
        functions.retain(|weak| match weak.upgrade() {
            Some(function) => {
                live.push(function);
                true
            }
            None => false,
        });
        live
    }
}

/// Creates fakes and mocks that share one nonce sequence, and the inspectors that
/// answer their calls.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
    nonces: NonceSequence,
    registry: FunctionRegistry,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn nonces(&self) -> &NonceSequence {
        &self.nonces
    }

    /// Creates a fake of `interface` and writes placeholder code to its address.
    pub fn fake<B: CodeBackend + ?Sized>(
        &self,
        backend: &mut B,
        interface: InterfaceSpec,
        options: FakeOptions,
    ) -> Result<FakeContract, MockError> {
        let address = options.address.unwrap_or_else(Address::random);
        let functions = FunctionSet::wire(FunctionMode::Fake, address, interface)?;
        backend.set_code(address, self.config.fake_code.clone())?;
        self.register(&functions);

        info!(
            target: "evm-mock::sandbox",
            %address,
            functions = functions.all().count(),
            "Created fake"
        );
        Ok(FakeContract::new(functions))
    }

    /// Wraps the contract deployed at `address`. Calls no rule answers run its code.
    pub fn mock(
        &self,
        interface: InterfaceSpec,
        address: Address,
        layout: Option<StorageLayout>,
    ) -> Result<MockContract, MockError> {
        let functions = FunctionSet::wire(FunctionMode::Mock, address, interface)?;
        self.register(&functions);

        info!(
            target: "evm-mock::sandbox",
            %address,
            functions = functions.all().count(),
            has_layout = layout.is_some(),
            "Created mock"
        );
        Ok(MockContract::new(functions, layout))
    }

    fn register(&self, functions: &FunctionSet) {
        self.registry.register(functions.all());
    }

    /// Inspector answering calls to every fake and mock of this sandbox, including the
    /// ones created after it.
    pub fn inspector(&self) -> MockInspector {
        MockInspector::new(self.registry.clone(), self.nonces.clone())
    }

    /// Restarts call nonces at zero.
    pub fn reset_nonces(&self) {
        self.nonces.reset();
    }

    /// Resets every function and restarts call nonces.
    pub fn reset(&self) {
        for function in self.registry.live() {
            function.reset();
        }
        self.nonces.reset();
    }
}
