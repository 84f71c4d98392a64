//! revm [`Inspector`] that answers calls to fakes and mocks.

use crate::{
    classifier::{
        PostCallEvent,
        PreCallEvent,
        ResultPairing,
    },
    encoder::revert_payload,
    function::ProgrammableFunction,
    history::NonceSequence,
    primitives::{
        Address,
        Bytes,
    },
    program::Resolution,
    sandbox::FunctionRegistry,
};
use revm::{
    Inspector,
    context::ContextTr,
    interpreter::{
        CallInputs,
        CallOutcome,
        Gas,
        InstructionResult,
        InterpreterResult,
    },
};
use std::ops::Range;
use tracing::{
    error,
    trace,
};

/// A call answered (or passed through) by a programmable function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interception {
    pub target: Address,
    pub function: String,
    /// `None` when the call could not be recorded.
    pub nonce: Option<u64>,
    pub resolution: Resolution,
}

/// Routes every call frame through the functions registered by a
/// [`Sandbox`](crate::Sandbox).
///
/// When several functions match a call, all of them record it and the first one to
/// answer decides the outcome.
#[derive(Debug)]
pub struct MockInspector {
    registry: FunctionRegistry,
    nonces: NonceSequence,
    pairing: ResultPairing,
    interceptions: Vec<Interception>,
    errors: Vec<String>,
}

impl MockInspector {
    pub(crate) fn new(
        registry: FunctionRegistry,
        nonces: NonceSequence,
    ) -> Self {
        Self {
            registry,
            nonces,
            pairing: ResultPairing::new(),
            interceptions: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Calls intercepted so far, in order.
    pub fn interceptions(&self) -> &[Interception] {
        &self.interceptions
    }

    /// Calls that could not be answered as programmed. Each of them reverted.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Clears the interception and error logs.
    pub fn clear(&mut self) {
        self.interceptions.clear();
        self.errors.clear();
    }

    fn intercept(&mut self, event: &PreCallEvent) -> Option<Resolution> {
        let matching: Vec<ProgrammableFunction> = self
            .registry
            .live()
            .into_iter()
            .filter(|function| function.matches(event))
            .collect();

        let mut calls = Vec::new();
        let mut answer = None;
        for function in matching {
            let handled = function.handle(event, &self.nonces);

            if let Resolution::Failed { error } = &handled.resolution {
                error!(
                    target: "evm-mock::inspector",
                    function = function.name(),
                    target_address = %function.target(),
                    %error,
                    "Failed to answer intercepted call"
                );
                self.errors.push(error.clone());
            }

            self.interceptions.push(Interception {
                target: function.target(),
                function: function.name().to_string(),
                nonce: handled.call.as_ref().map(|call| call.nonce),
                resolution: handled.resolution.clone(),
            });
            calls.extend(handled.call);

            if answer.is_none() && handled.resolution != Resolution::CallThrough {
                answer = Some(handled.resolution);
            }
        }

        self.pairing.enter(calls);
        answer
    }
}

fn call_outcome(resolution: Resolution, gas: Gas, memory_offset: Range<usize>) -> CallOutcome {
    let (result, output): (InstructionResult, Bytes) = match resolution {
        Resolution::Return(output) => (InstructionResult::Return, output),
        Resolution::Revert { reason } => {
            (InstructionResult::Revert, revert_payload(reason.as_deref()))
        }
        Resolution::Failed { error } => (InstructionResult::Revert, revert_payload(Some(&error))),
        Resolution::CallThrough => (InstructionResult::Stop, Bytes::new()),
    };
    CallOutcome::new(
        InterpreterResult {
            result,
            output,
            gas,
        },
        memory_offset,
    )
}

impl<CTX: ContextTr> Inspector<CTX> for MockInspector {
    fn call(&mut self, context: &mut CTX, inputs: &mut CallInputs) -> Option<CallOutcome> {
        let event = PreCallEvent::from_inputs(inputs, &*context);
        let resolution = self.intercept(&event)?;

        trace!(
            target: "evm-mock::inspector",
            recipient = %event.recipient,
            ?resolution,
            "Answering call"
        );
        Some(call_outcome(
            resolution,
            Gas::new(inputs.gas_limit),
            inputs.return_memory_offset.clone(),
        ))
    }

    fn call_end(&mut self, _context: &mut CTX, _inputs: &CallInputs, outcome: &mut CallOutcome) {
        let event = PostCallEvent::from_outcome(outcome);
        for call in self.pairing.exit(&event) {
            trace!(
                target: "evm-mock::inspector",
                nonce = call.nonce,
                success = event.success,
                "Paired call result"
            );
        }
    }
}
