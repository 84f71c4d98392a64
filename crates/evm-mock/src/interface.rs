//! Contract interfaces a fake or mock is built from.

use crate::error::MockError;
use alloy_json_abi::{
    Fallback,
    Function,
    JsonAbi,
    Receive,
    StateMutability,
};
use tracing::debug;

/// The ABI of the contract being faked or mocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    abi: JsonAbi,
}

impl InterfaceSpec {
    pub fn from_abi(abi: JsonAbi) -> Self {
        Self { abi }
    }

    /// Interface from human-readable signatures such as `function balanceOf(address) returns (uint256)`.
    pub fn from_signatures<I, S>(signatures: I) -> Result<Self, MockError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let signatures: Vec<S> = signatures.into_iter().collect();
        parse_signatures(signatures.iter().map(AsRef::as_ref))
            .map(Self::from_abi)
            .map_err(|err| {
                MockError::InterfaceResolution {
                    errors: vec![format!("human-readable signatures: {err}")],
                }
            })
    }

    /// Resolves an interface from ABI JSON, a compiler artifact carrying an `abi`, or
    /// newline separated human-readable signatures.
    ///
    /// When every form fails, the error lists why each one did.
    pub fn resolve(source: &str) -> Result<Self, MockError> {
        let mut errors = Vec::new();

        match serde_json::from_str::<JsonAbi>(source) {
            Ok(abi) => return Ok(Self::from_abi(abi)),
            Err(err) => errors.push(format!("ABI JSON: {err}")),
        }

        match serde_json::from_str::<serde_json::Value>(source) {
            Ok(serde_json::Value::Object(mut artifact)) => match artifact.remove("abi") {
                Some(abi) => match serde_json::from_value::<JsonAbi>(abi) {
                    Ok(abi) => return Ok(Self::from_abi(abi)),
                    Err(err) => errors.push(format!("artifact: {err}")),
                },
                None => errors.push("artifact: no `abi` field".to_string()),
            },
            Ok(_) => errors.push("artifact: not a JSON object".to_string()),
            Err(err) => errors.push(format!("artifact: {err}")),
        }

        let lines = source
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty());
        match parse_signatures(lines) {
            Ok(abi) if !abi.is_empty() => return Ok(Self::from_abi(abi)),
            Ok(_) => errors.push("human-readable signatures: no items".to_string()),
            Err(err) => errors.push(format!("human-readable signatures: {err}")),
        }

        debug!(target: "evm-mock::interface", ?errors, "Interface resolution failed");
        Err(MockError::InterfaceResolution { errors })
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// Functions in declaration order, overloads included.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.abi.functions()
    }

    /// Whether calls without call data have a handler.
    pub fn has_fallback(&self) -> bool {
        self.abi.fallback.is_some() || self.abi.receive.is_some()
    }
}

/// Parses human-readable items. `fallback` and `receive` declarations are set on the ABI
/// directly, the signature parser does not accept them.
fn parse_signatures<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<JsonAbi, String> {
    let mut fallback = None;
    let mut receive = None;
    let mut items = Vec::new();

    for line in lines {
        let line = line.trim();
        let payable = line.split_whitespace().any(|word| word == "payable");
        if line.starts_with("fallback(") || line.starts_with("fallback ") {
            fallback = Some(Fallback {
                state_mutability: if payable {
                    StateMutability::Payable
                } else {
                    StateMutability::NonPayable
                },
            });
        } else if line.starts_with("receive(") || line.starts_with("receive ") {
            receive = Some(Receive {
                state_mutability: StateMutability::Payable,
            });
        } else {
            items.push(line);
        }
    }

    let mut abi = JsonAbi::parse(items).map_err(|err| err.to_string())?;
    abi.fallback = fallback;
    abi.receive = receive;
    Ok(abi)
}

impl From<JsonAbi> for InterfaceSpec {
    fn from(abi: JsonAbi) -> Self {
        Self::from_abi(abi)
    }
}
