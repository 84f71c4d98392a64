use crate::{
    error::{
        MockError,
        StorageError,
    },
    function::{
        FunctionMode,
        ProgrammableFunction,
    },
    interface::InterfaceSpec,
    primitives::Address,
    storage::{
        ContractStorage,
        StorageBackend,
        StorageLayout,
    },
    value::Value,
};

/// The programmable functions wired for one address.
#[derive(Debug, Clone)]
pub(crate) struct FunctionSet {
    address: Address,
    interface: InterfaceSpec,
    functions: Vec<ProgrammableFunction>,
    fallback: Option<ProgrammableFunction>,
}

impl FunctionSet {
    pub(crate) fn wire(
        mode: FunctionMode,
        address: Address,
        interface: InterfaceSpec,
    ) -> Result<Self, MockError> {
        let functions = interface
            .functions()
            .map(|function| ProgrammableFunction::new(mode, address, function.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let fallback = interface
            .has_fallback()
            .then(|| ProgrammableFunction::fallback(mode, address));
        Ok(Self {
            address,
            interface,
            functions,
            fallback,
        })
    }

    /// Every function, fallback last.
    pub(crate) fn all(&self) -> impl Iterator<Item = &ProgrammableFunction> {
        self.functions.iter().chain(self.fallback.as_ref())
    }

    /// Looks up a function by exact signature, then by name.
    fn function(&self, name: &str) -> Result<&ProgrammableFunction, MockError> {
        self.functions
            .iter()
            .find(|f| f.name() == name)
            .or_else(|| {
                self.functions
                    .iter()
                    .find(|f| f.name().split('(').next() == Some(name))
            })
            .ok_or_else(|| MockError::UnknownFunction(name.to_string()))
    }

    fn reset(&self) {
        for function in self.all() {
            function.reset();
        }
    }
}

/// A synthetic contract whose calls never execute code.
#[derive(Debug, Clone)]
pub struct FakeContract {
    functions: FunctionSet,
}

impl FakeContract {
    pub(crate) fn new(functions: FunctionSet) -> Self {
        Self { functions }
    }

    pub fn address(&self) -> Address {
        self.functions.address
    }

    pub fn interface(&self) -> &InterfaceSpec {
        &self.functions.interface
    }

    /// The function with signature or name `name`. Overloads are told apart by signature.
    pub fn function(&self, name: &str) -> Result<&ProgrammableFunction, MockError> {
        self.functions.function(name)
    }

    /// Handler of calls without call data, when the interface declares one.
    pub fn fallback(&self) -> Option<&ProgrammableFunction> {
        self.functions.fallback.as_ref()
    }

    pub fn functions(&self) -> &[ProgrammableFunction] {
        &self.functions.functions
    }

    /// Resets every function.
    pub fn reset(&self) {
        self.functions.reset();
    }
}

/// A deployed contract whose calls are recorded, answered by rules when one applies,
/// and otherwise run the contract's code.
#[derive(Debug, Clone)]
pub struct MockContract {
    functions: FunctionSet,
    storage: Option<ContractStorage>,
}

impl MockContract {
    pub(crate) fn new(functions: FunctionSet, layout: Option<StorageLayout>) -> Self {
        let storage = layout.map(|layout| ContractStorage::new(functions.address, layout));
        Self { functions, storage }
    }

    pub fn address(&self) -> Address {
        self.functions.address
    }

    pub fn interface(&self) -> &InterfaceSpec {
        &self.functions.interface
    }

    pub fn function(&self, name: &str) -> Result<&ProgrammableFunction, MockError> {
        self.functions.function(name)
    }

    pub fn fallback(&self) -> Option<&ProgrammableFunction> {
        self.functions.fallback.as_ref()
    }

    pub fn functions(&self) -> &[ProgrammableFunction] {
        &self.functions.functions
    }

    pub fn reset(&self) {
        self.functions.reset();
    }

    /// Storage variables, when the mock was built with a layout.
    pub fn storage(&self) -> Result<&ContractStorage, MockError> {
        self.storage.as_ref().ok_or_else(|| {
            StorageError::Layout(format!("no storage layout for mock at {}", self.address()))
                .into()
        })
    }

    pub fn set_variable<B: StorageBackend + ?Sized>(
        &self,
        backend: &mut B,
        label: &str,
        value: impl Into<Value>,
    ) -> Result<(), MockError> {
        Ok(self.storage()?.set_variable(backend, label, value)?)
    }

    pub fn set_variables<B, I, K, V>(&self, backend: &mut B, values: I) -> Result<(), MockError>
    where
        B: StorageBackend + ?Sized,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        Ok(self.storage()?.set_variables(backend, values)?)
    }

    pub fn get_variable<B: StorageBackend + ?Sized>(
        &self,
        backend: &mut B,
        label: &str,
        path: &[Value],
    ) -> Result<Value, MockError> {
        Ok(self.storage()?.get_variable(backend, label, path)?)
    }
}
