//! Routing of raw call events to the functions that handle them.
//!
//! The EVM emits a [`PreCallEvent`] when a call frame starts and a [`PostCallEvent`] when
//! it ends. A [`MessageClassifier`] is a pure filter plus decoder for one function of one
//! contract, and [`ResultPairing`] ties each classified call to the result of its frame.

use crate::{
    error::MockError,
    history::{
        CallArguments,
        CallResult,
        ContractCall,
        NonceSequence,
    },
    primitives::{
        Address,
        Bytes,
        Selector,
        U256,
    },
    value::Value,
};
use alloy_dyn_abi::{
    DynSolType,
    DynSolValue,
    Specifier,
};
use alloy_json_abi::Function;
use revm::{
    context::ContextTr,
    interpreter::{
        CallInputs,
        CallOutcome,
        CallScheme,
    },
};
use std::sync::Arc;

/// A call frame about to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreCallEvent {
    pub data: Bytes,
    pub value: U256,
    /// Account whose storage the frame runs against.
    pub recipient: Address,
    pub is_delegate: bool,
    /// Account whose code the frame runs.
    pub code_address: Address,
    pub caller: Address,
}

impl PreCallEvent {
    /// Builds the event from revm call inputs.
    pub fn from_inputs<CTX: ContextTr>(inputs: &CallInputs, context: &CTX) -> Self {
        let is_delegate = matches!(
            inputs.scheme,
            CallScheme::DelegateCall | CallScheme::CallCode
        );
        Self {
            data: inputs.input.bytes(context),
            value: inputs.value.get(),
            recipient: inputs.target_address,
            is_delegate,
            code_address: inputs.bytecode_address,
            caller: inputs.caller,
        }
    }

    /// The code address for delegated calls, the recipient otherwise.
    pub fn effective_recipient(&self) -> Address {
        if self.is_delegate {
            self.code_address
        } else {
            self.recipient
        }
    }
}

/// A call frame that finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCallEvent {
    pub success: bool,
    pub output: Bytes,
}

impl PostCallEvent {
    pub fn from_outcome(outcome: &CallOutcome) -> Self {
        Self {
            success: outcome.result.result.is_ok(),
            output: outcome.result.output.clone(),
        }
    }
}

impl From<PostCallEvent> for CallResult {
    fn from(event: PostCallEvent) -> Self {
        CallResult {
            success: event.success,
            output: event.output,
        }
    }
}

/// Selects the calls addressed to one function of one contract.
#[derive(Debug, Clone)]
pub struct MessageClassifier {
    target: Address,
    /// `None` for the fallback function.
    function: Option<Function>,
    inputs: Option<DynSolType>,
}

impl MessageClassifier {
    /// Classifier for a function with a selector. Fails if an input type does not resolve.
    pub fn new(target: Address, function: Function) -> Result<Self, MockError> {
        let inputs = function
            .inputs
            .iter()
            .map(|param| param.resolve())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| MockError::ArgumentDecode {
                function: function.signature(),
                source,
            })?;
        Ok(Self {
            target,
            function: Some(function),
            inputs: Some(DynSolType::Tuple(inputs)),
        })
    }

    /// Classifier for calls carrying no call data.
    pub fn fallback(target: Address) -> Self {
        Self {
            target,
            function: None,
            inputs: None,
        }
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn selector(&self) -> Option<Selector> {
        self.function.as_ref().map(Function::selector)
    }

    pub fn function(&self) -> Option<&Function> {
        self.function.as_ref()
    }

    /// Whether `event` is addressed to this function.
    pub fn matches(&self, event: &PreCallEvent) -> bool {
        let selector_matches = match self.selector() {
            None => event.data.is_empty(),
            Some(selector) => event.data.len() >= 4 && event.data[..4] == selector[..],
        };
        selector_matches && event.effective_recipient() == self.target
    }

    /// Turns a matching event into a [`ContractCall`], consuming one nonce.
    ///
    /// Arguments are decoded before the nonce is taken, so a decode failure leaves the
    /// sequence untouched.
    pub fn classify(
        &self,
        event: &PreCallEvent,
        nonces: &NonceSequence,
    ) -> Result<ContractCall, MockError> {
        let args = match (&self.function, &self.inputs) {
            (Some(function), Some(inputs)) => {
                let decoded = inputs
                    .abi_decode_params(&event.data[4..])
                    .map_err(|source| MockError::ArgumentDecode {
                        function: function.signature(),
                        source,
                    })?;
                let values = match decoded {
                    DynSolValue::Tuple(values) => values,
                    other => vec![other],
                };
                CallArguments::Decoded(Value::from_arguments(values, &function.inputs))
            }
            _ => CallArguments::Raw(event.data.clone()),
        };

        let delegated_from = event.is_delegate.then_some(event.recipient);
        Ok(ContractCall::new(
            args,
            nonces.next(),
            event.value,
            event.effective_recipient(),
            delegated_from,
        ))
    }
}

/// Pairs classified calls with the result of the frame they were made in.
///
/// Frames nest, so pairing follows a stack: every pre-call event opens a frame, every
/// post-call event closes the innermost one. A call is paired at most once.
#[derive(Debug, Default)]
pub struct ResultPairing {
    frames: Vec<Vec<Arc<ContractCall>>>,
}

impl ResultPairing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a frame holding the calls classified from its pre-call event.
    pub fn enter(&mut self, calls: Vec<Arc<ContractCall>>) {
        self.frames.push(calls);
    }

    /// Closes the innermost frame and pairs its calls with `event`.
    ///
    /// Returns the calls that received a result. Calls that were already paired and
    /// events with no open frame are ignored.
    pub fn exit(&mut self, event: &PostCallEvent) -> Vec<Arc<ContractCall>> {
        let Some(calls) = self.frames.pop() else {
            return Vec::new();
        };
        calls
            .into_iter()
            .filter(|call| call.pair_result(event.clone().into()))
            .collect()
    }

    /// Number of open frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
