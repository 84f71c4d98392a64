mod error;
pub use error::{
    EncodeError,
    MockError,
    StorageError,
};

pub mod config;
pub use config::SandboxConfig;

pub mod primitives;

pub mod value;
pub use value::Value;

pub mod matcher;

pub mod history;
pub use history::{
    CallArguments,
    CallHistory,
    CallPredicate,
    ContractCall,
    NonceSequence,
};

pub mod classifier;

pub mod program;
pub use program::{
    Answer,
    Resolution,
    ResponseProgram,
    ResponseRule,
};

pub mod encoder;

mod function;
pub use function::{
    FunctionMode,
    ProgrammableFunction,
    WhenCalledWith,
};

pub mod interface;
pub use interface::InterfaceSpec;

mod contract;
pub use contract::{
    FakeContract,
    MockContract,
};

mod sandbox;
pub use sandbox::{
    FakeOptions,
    Sandbox,
};

pub mod inspector;
pub use inspector::{
    Interception,
    MockInspector,
};

pub mod evm;

pub mod storage;
pub use storage::{
    ContractStorage,
    StorageLayout,
};

#[cfg(any(test, feature = "test"))]
pub mod test_utils;
