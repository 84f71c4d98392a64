//! Per-function ledger of intercepted calls.
//!
//! Every classified call gets a nonce from a [`NonceSequence`] shared by all functions
//! wired through one [`Sandbox`](crate::Sandbox). Ordering predicates between two
//! histories compare those nonces only.

use crate::{
    error::MockError,
    matcher,
    primitives::{
        Address,
        Bytes,
        U256,
    },
    value::Value,
};
use std::sync::{
    Arc,
    OnceLock,
    atomic::{
        AtomicU64,
        Ordering,
    },
};

/// Monotonic counter handing out call nonces.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct NonceSequence {
    next: Arc<AtomicU64>,
}

impl NonceSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes and returns the next nonce.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Returns the nonce the next call will receive.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Restarts the sequence at zero.
    pub fn reset(&self) {
        self.next.store(0, Ordering::SeqCst);
    }
}

/// Arguments of a recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArguments {
    /// Arguments decoded with the function's input signature.
    Decoded(Vec<Value>),
    /// Raw call data, recorded for the fallback function.
    Raw(Bytes),
}

impl CallArguments {
    /// The arguments as a value tuple. Raw data is a single bytes value.
    pub fn values(&self) -> Vec<Value> {
        match self {
            CallArguments::Decoded(values) => values.clone(),
            CallArguments::Raw(data) => vec![Value::Bytes(data.clone())],
        }
    }

    pub fn matches(&self, expected: &[Value]) -> bool {
        match self {
            CallArguments::Decoded(values) => matcher::arguments_equal(values, expected),
            CallArguments::Raw(data) => {
                matcher::arguments_equal(&[Value::Bytes(data.clone())], expected)
            }
        }
    }
}

/// Outcome of a recorded call, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub success: bool,
    pub output: Bytes,
}

/// A call matched by one function of one contract.
#[derive(Debug)]
pub struct ContractCall {
    pub args: CallArguments,
    pub nonce: u64,
    pub value: U256,
    /// Address whose code handled the call.
    pub target: Address,
    /// Storage context of a delegated call.
    pub delegated_from: Option<Address>,
    result: OnceLock<CallResult>,
}

impl ContractCall {
    pub fn new(
        args: CallArguments,
        nonce: u64,
        value: U256,
        target: Address,
        delegated_from: Option<Address>,
    ) -> Self {
        Self {
            args,
            nonce,
            value,
            target,
            delegated_from,
            result: OnceLock::new(),
        }
    }

    /// Result paired with this call, once the call returned.
    pub fn result(&self) -> Option<&CallResult> {
        self.result.get()
    }

    /// Pairs the call with its result. Returns `false` if a result was already paired.
    pub(crate) fn pair_result(&self, result: CallResult) -> bool {
        self.result.set(result).is_ok()
    }
}

/// Predicates an assertion library can evaluate against a history.
#[derive(Debug, Clone)]
pub enum CallPredicate<'a> {
    Called,
    CalledOnce,
    CalledTwice,
    CalledThrice,
    CallCount(usize),
    CalledWith(Vec<Value>),
    CalledOnceWith(Vec<Value>),
    CalledWithValue(U256),
    DelegatedFrom(Address),
    CalledBefore(&'a CallHistory),
    CalledAfter(&'a CallHistory),
    CalledImmediatelyBefore(&'a CallHistory),
    CalledImmediatelyAfter(&'a CallHistory),
}

impl CallPredicate<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            CallPredicate::Called => "called",
            CallPredicate::CalledOnce => "calledOnce",
            CallPredicate::CalledTwice => "calledTwice",
            CallPredicate::CalledThrice => "calledThrice",
            CallPredicate::CallCount(_) => "callCount",
            CallPredicate::CalledWith(_) => "calledWith",
            CallPredicate::CalledOnceWith(_) => "calledOnceWith",
            CallPredicate::CalledWithValue(_) => "calledWithValue",
            CallPredicate::DelegatedFrom(_) => "delegatedFrom",
            CallPredicate::CalledBefore(_) => "calledBefore",
            CallPredicate::CalledAfter(_) => "calledAfter",
            CallPredicate::CalledImmediatelyBefore(_) => "calledImmediatelyBefore",
            CallPredicate::CalledImmediatelyAfter(_) => "calledImmediatelyAfter",
        }
    }
}

/// Ordered record of the calls matched by one function.
#[derive(Debug, Clone)]
pub struct CallHistory {
    name: String,
    calls: Vec<Arc<ContractCall>>,
}

impl CallHistory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn push(&mut self, call: Arc<ContractCall>) {
        self.calls.push(call);
    }

    pub(crate) fn clear(&mut self) {
        self.calls.clear();
    }

    pub fn calls(&self) -> &[Arc<ContractCall>] {
        &self.calls
    }

    pub fn last(&self) -> Option<&Arc<ContractCall>> {
        self.calls.last()
    }

    /// Returns the call at `index`.
    pub fn get_call(&self, index: usize) -> Result<Arc<ContractCall>, MockError> {
        self.calls
            .get(index)
            .cloned()
            .ok_or_else(|| self.out_of_range(index))
    }

    /// History view holding only the call at `index`.
    pub fn at_call(&self, index: usize) -> Result<CallHistory, MockError> {
        let call = self.get_call(index)?;
        Ok(CallHistory {
            name: self.name.clone(),
            calls: vec![call],
        })
    }

    fn out_of_range(&self, index: usize) -> MockError {
        MockError::CallOutOfRange {
            function: self.name.clone(),
            expected: humanize_times(index + 1),
            actual: humanize_times(self.call_count()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn called(&self) -> bool {
        !self.calls.is_empty()
    }

    pub fn called_once(&self) -> bool {
        self.call_count() == 1
    }

    pub fn called_twice(&self) -> bool {
        self.call_count() == 2
    }

    pub fn called_thrice(&self) -> bool {
        self.call_count() == 3
    }

    pub fn called_with(&self, expected: &[Value]) -> bool {
        self.calls.iter().any(|call| call.args.matches(expected))
    }

    pub fn always_called_with(&self, expected: &[Value]) -> bool {
        self.called() && self.calls.iter().all(|call| call.args.matches(expected))
    }

    pub fn called_once_with(&self, expected: &[Value]) -> bool {
        self.called_once() && self.called_with(expected)
    }

    pub fn called_with_value(&self, value: U256) -> bool {
        self.calls.iter().any(|call| call.value == value)
    }

    /// Whether any call was delegated from `delegator`. Accepts an [`Address`] or a
    /// hex string in any letter case.
    pub fn delegated_from(&self, delegator: impl ToString) -> bool {
        let delegator = delegator.to_string().to_lowercase();
        self.calls.iter().any(|call| {
            call.delegated_from
                .is_some_and(|from| from.to_string().to_lowercase() == delegator)
        })
    }

    pub fn called_before(&self, other: &CallHistory) -> bool {
        self.any_nonce_pair(other, |a, b| a < b)
    }

    pub fn called_after(&self, other: &CallHistory) -> bool {
        self.any_nonce_pair(other, |a, b| a > b)
    }

    pub fn called_immediately_before(&self, other: &CallHistory) -> bool {
        self.any_nonce_pair(other, |a, b| a + 1 == b)
    }

    pub fn called_immediately_after(&self, other: &CallHistory) -> bool {
        self.any_nonce_pair(other, |a, b| a == b + 1)
    }

    pub fn always_called_before(&self, other: &CallHistory) -> bool {
        match (self.calls.last(), other.calls.first()) {
            (Some(last), Some(first)) => last.nonce < first.nonce,
            _ => false,
        }
    }

    pub fn always_called_after(&self, other: &CallHistory) -> bool {
        match (self.calls.first(), other.calls.last()) {
            (Some(first), Some(last)) => first.nonce > last.nonce,
            _ => false,
        }
    }

    pub fn always_called_immediately_before(&self, other: &CallHistory) -> bool {
        self.pairwise_adjacent(other, |a, b| a + 1 == b)
    }

    pub fn always_called_immediately_after(&self, other: &CallHistory) -> bool {
        self.pairwise_adjacent(other, |a, b| a == b + 1)
    }

    /// Evaluates `predicate`, or its "always" form when `always` is set.
    pub fn check(&self, predicate: &CallPredicate<'_>, always: bool) -> Result<bool, MockError> {
        let result = match (predicate, always) {
            (CallPredicate::CalledWith(args), false) => self.called_with(args),
            (CallPredicate::CalledWith(args), true) => self.always_called_with(args),
            (CallPredicate::CalledBefore(other), false) => self.called_before(other),
            (CallPredicate::CalledBefore(other), true) => self.always_called_before(other),
            (CallPredicate::CalledAfter(other), false) => self.called_after(other),
            (CallPredicate::CalledAfter(other), true) => self.always_called_after(other),
            (CallPredicate::CalledImmediatelyBefore(other), false) => {
                self.called_immediately_before(other)
            }
            (CallPredicate::CalledImmediatelyBefore(other), true) => {
                self.always_called_immediately_before(other)
            }
            (CallPredicate::CalledImmediatelyAfter(other), false) => {
                self.called_immediately_after(other)
            }
            (CallPredicate::CalledImmediatelyAfter(other), true) => {
                self.always_called_immediately_after(other)
            }
            (predicate, true) => {
                return Err(MockError::UnsupportedAlwaysModifier {
                    predicate: predicate.name(),
                });
            }
            (CallPredicate::Called, false) => self.called(),
            (CallPredicate::CalledOnce, false) => self.called_once(),
            (CallPredicate::CalledTwice, false) => self.called_twice(),
            (CallPredicate::CalledThrice, false) => self.called_thrice(),
            (CallPredicate::CallCount(count), false) => self.call_count() == *count,
            (CallPredicate::CalledOnceWith(args), false) => self.called_once_with(args),
            (CallPredicate::CalledWithValue(value), false) => self.called_with_value(*value),
            (CallPredicate::DelegatedFrom(address), false) => self.delegated_from(address),
        };
        Ok(result)
    }

    fn any_nonce_pair(&self, other: &CallHistory, cmp: impl Fn(u64, u64) -> bool) -> bool {
        self.calls
            .iter()
            .any(|a| other.calls.iter().any(|b| cmp(a.nonce, b.nonce)))
    }

    fn pairwise_adjacent(&self, other: &CallHistory, cmp: impl Fn(u64, u64) -> bool) -> bool {
        self.called()
            && self.call_count() == other.call_count()
            && self
                .calls
                .iter()
                .zip(&other.calls)
                .all(|(a, b)| cmp(a.nonce, b.nonce))
    }
}

/// "once", "twice", "thrice", or "N times".
pub fn humanize_times(count: usize) -> String {
    match count {
        1 => "once".to_string(),
        2 => "twice".to_string(),
        3 => "thrice".to_string(),
        n => format!("{n} times"),
    }
}
