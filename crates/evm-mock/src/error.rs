use thiserror::Error;

#[derive(Error, Debug)]
pub enum MockError {
    #[error("Failed to decode message data for {function}: {source}")]
    ArgumentDecode {
        function: String,
        #[source]
        source: alloy_dyn_abi::Error,
    },
    #[error("Failed to encode return value for {function}: {source}")]
    Encoding {
        function: String,
        #[source]
        source: EncodeError,
    },
    #[error("expected {function} to have been called {expected}, but it was called {actual}")]
    CallOutOfRange {
        function: String,
        expected: String,
        actual: String,
    },
    #[error("The \"always\" modifier is not supported by {predicate}")]
    UnsupportedAlwaysModifier { predicate: &'static str },
    #[error("unable to resolve contract interface:\n{}", .errors.join("\n"))]
    InterfaceResolution { errors: Vec<String> },
    #[error("Function {0} not found in contract interface")]
    UnknownFunction(String),
    #[error("Response function for {function} failed: {reason}")]
    ResponseFunction { function: String, reason: String },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Failure to turn a programmed [`Value`](crate::Value) into ABI data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },
    #[error("expected {expected} values, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("missing value for member `{0}`")]
    MissingMember(String),
    #[error("value {value} does not fit in {ty}")]
    Overflow { value: String, ty: String },
    #[error("invalid type `{ty}`: {reason}")]
    InvalidType { ty: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Variable `{0}` not found in storage layout")]
    UnknownVariable(String),
    #[error("Member `{member}` not found in {ty}")]
    UnknownMember { ty: String, member: String },
    #[error("Index {index} out of range for {ty} of length {length}")]
    IndexOutOfRange {
        ty: String,
        index: usize,
        length: usize,
    },
    #[error("Reading {0} requires a key for every mapping level")]
    MissingMappingKey(String),
    #[error("Access path continues past {0}, which has no keys, indices or members")]
    PathTooLong(String),
    #[error("Unsupported storage type `{0}`")]
    UnsupportedType(String),
    #[error("Cannot store {value} as {ty}: {reason}")]
    InvalidValue {
        ty: String,
        value: String,
        reason: String,
    },
    #[error("Invalid storage layout: {0}")]
    Layout(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Failed to parse storage layout: {0}")]
    Json(#[from] serde_json::Error),
}
