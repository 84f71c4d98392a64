//! Test-author handle of one intercepted function.

use crate::{
    classifier::{
        MessageClassifier,
        PreCallEvent,
    },
    encoder::ResponseEncoder,
    error::MockError,
    history::{
        CallHistory,
        ContractCall,
        NonceSequence,
    },
    primitives::{
        Address,
        Selector,
    },
    program::{
        Answer,
        Resolution,
        ResponseProgram,
        ResponseRule,
    },
    value::Value,
};
use alloy_json_abi::Function;
use futures::FutureExt;
use parking_lot::Mutex;
use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        Weak,
    },
};
use tracing::{
    debug,
    trace,
};

/// Whether unanswered calls return zero values or run the contract's own code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionMode {
    Fake,
    Mock,
}

type Subscriber = Arc<dyn Fn(&Arc<ContractCall>) + Send + Sync>;

struct FunctionState {
    classifier: MessageClassifier,
    encoder: Arc<ResponseEncoder>,
    program: ResponseProgram,
    history: CallHistory,
    subscribers: Vec<Subscriber>,
}

/// One intercepted call and how it was answered.
#[derive(Debug, Clone)]
pub(crate) struct Handled {
    pub call: Option<Arc<ContractCall>>,
    pub resolution: Resolution,
}

/// Programmable function of a fake or mock.
///
/// Cloning gives another handle to the same function; the inspector and the test hold
/// handles to shared state.
#[derive(Clone)]
pub struct ProgrammableFunction {
    mode: FunctionMode,
    name: Arc<str>,
    state: Arc<Mutex<FunctionState>>,
}

impl fmt::Debug for ProgrammableFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgrammableFunction")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Handle that does not keep a function alive.
#[derive(Debug, Clone)]
pub(crate) struct WeakFunction {
    mode: FunctionMode,
    name: Arc<str>,
    state: Weak<Mutex<FunctionState>>,
}

impl WeakFunction {
    /// The function, unless every strong handle to it was dropped.
    pub(crate) fn upgrade(&self) -> Option<ProgrammableFunction> {
        Some(ProgrammableFunction {
            mode: self.mode,
            name: self.name.clone(),
            state: self.state.upgrade()?,
        })
    }
}

impl ProgrammableFunction {
    pub(crate) fn downgrade(&self) -> WeakFunction {
        WeakFunction {
            mode: self.mode,
            name: self.name.clone(),
            state: Arc::downgrade(&self.state),
        }
    }

    pub(crate) fn new(
        mode: FunctionMode,
        target: Address,
        function: Function,
    ) -> Result<Self, MockError> {
        let classifier = MessageClassifier::new(target, function.clone())?;
        let encoder = ResponseEncoder::new(function)?;
        Ok(Self::from_parts(mode, classifier, encoder))
    }

    pub(crate) fn fallback(mode: FunctionMode, target: Address) -> Self {
        Self::from_parts(
            mode,
            MessageClassifier::fallback(target),
            ResponseEncoder::fallback(),
        )
    }

    fn from_parts(mode: FunctionMode, classifier: MessageClassifier, encoder: ResponseEncoder) -> Self {
        let name: Arc<str> = encoder.name().into();
        Self {
            mode,
            name: name.clone(),
            state: Arc::new(Mutex::new(FunctionState {
                classifier,
                encoder: Arc::new(encoder),
                program: ResponseProgram::new(),
                history: CallHistory::new(name.to_string()),
                subscribers: Vec::new(),
            })),
        }
    }

    /// Signature of the function, or `fallback`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> FunctionMode {
        self.mode
    }

    pub fn target(&self) -> Address {
        self.state.lock().classifier.target()
    }

    pub fn selector(&self) -> Option<Selector> {
        self.state.lock().classifier.selector()
    }

    fn program(&self, rule: ResponseRule) -> &Self {
        trace!(target: "evm-mock::function", function = %self.name, ?rule, "Programming rule");
        self.state.lock().program.set(rule);
        self
    }

    /// Answers every call with `value`.
    pub fn returns(&self, value: impl Into<Value>) -> &Self {
        self.program(ResponseRule::Default(Answer::Value(Some(value.into()))))
    }

    /// Answers every call with the zero value of the return type.
    pub fn returns_default(&self) -> &Self {
        self.program(ResponseRule::Default(Answer::Value(None)))
    }

    /// Answers every call with `f` applied to the call arguments.
    pub fn returns_with<F>(&self, f: F) -> &Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.try_returns_with(move |args| Ok(f(args)))
    }

    /// Like [`returns_with`](Self::returns_with), for response functions that can fail.
    /// A failure answers the call with a revert carrying the error.
    pub fn try_returns_with<F>(&self, f: F) -> &Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.program(ResponseRule::Default(Answer::Function(Arc::new(f))))
    }

    /// Answers every call with the output of an async response function.
    ///
    /// The future is driven to completion with `futures::executor::block_on` on the thread
    /// running the EVM. A future that needs a tokio runtime (timers, IO) only completes when
    /// the EVM runs on a blocking thread of a multi-threaded runtime, such as inside
    /// `tokio::task::spawn_blocking`. On a current-thread runtime it deadlocks.
    pub fn returns_async<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.program(ResponseRule::Default(Answer::Async(Arc::new(move |args| {
            f(args).boxed()
        }))))
    }

    /// Answers the call with index `index` (zero based, since the last reset) with `value`.
    pub fn returns_at_call(&self, index: usize, value: impl Into<Value>) -> &Self {
        self.program(ResponseRule::AtCall(index, Answer::Value(Some(value.into()))))
    }

    pub fn returns_at_call_with<F>(&self, index: usize, f: F) -> &Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.program(ResponseRule::AtCall(
            index,
            Answer::Function(Arc::new(move |args| Ok(f(args)))),
        ))
    }

    /// Reverts every call without a reason.
    pub fn reverts(&self) -> &Self {
        self.program(ResponseRule::Default(Answer::Revert(None)))
    }

    pub fn reverts_with_reason(&self, reason: impl Into<String>) -> &Self {
        self.program(ResponseRule::Default(Answer::Revert(Some(reason.into()))))
    }

    pub fn reverts_at_call(&self, index: usize, reason: Option<&str>) -> &Self {
        self.program(ResponseRule::AtCall(
            index,
            Answer::Revert(reason.map(str::to_string)),
        ))
    }

    /// Starts a rule that applies to calls whose arguments deep-equal `args`.
    pub fn when_called_with<I, V>(&self, args: I) -> WhenCalledWith
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        WhenCalledWith {
            function: self.clone(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Drops all rules and recorded calls. Wiring and subscribers stay.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.program.reset();
        state.history.clear();
    }

    /// Calls `f` with every call this function intercepts, in order.
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&Arc<ContractCall>) + Send + Sync + 'static,
    {
        self.state.lock().subscribers.push(Arc::new(f));
    }

    /// Snapshot of the calls recorded so far.
    pub fn history(&self) -> CallHistory {
        self.state.lock().history.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().history.call_count()
    }

    pub fn get_call(&self, index: usize) -> Result<Arc<ContractCall>, MockError> {
        self.state.lock().history.get_call(index)
    }

    pub fn at_call(&self, index: usize) -> Result<CallHistory, MockError> {
        self.state.lock().history.at_call(index)
    }

    pub(crate) fn matches(&self, event: &PreCallEvent) -> bool {
        self.state.lock().classifier.matches(event)
    }

    /// Records a matching call and works out its answer.
    ///
    /// Response functions and subscribers run after the lock is released.
    pub(crate) fn handle(&self, event: &PreCallEvent, nonces: &NonceSequence) -> Handled {
        let (call, answer, encoder, subscribers) = {
            let mut state = self.state.lock();
            let call = match state.classifier.classify(event, nonces) {
                Ok(call) => Arc::new(call),
                Err(err) => {
                    return Handled {
                        call: None,
                        resolution: Resolution::Failed {
                            error: err.to_string(),
                        },
                    };
                }
            };
            state.history.push(call.clone());
            let index = state.program.next_index();
            let answer = state.program.resolve(index, &call.args).cloned();
            (
                call,
                answer,
                state.encoder.clone(),
                state.subscribers.clone(),
            )
        };

        debug!(
            target: "evm-mock::function",
            function = %self.name,
            nonce = call.nonce,
            ?answer,
            "Intercepted call"
        );

        for subscriber in &subscribers {
            subscriber(&call);
        }

        let resolution = match answer {
            None => match self.mode {
                FunctionMode::Fake => Resolution::Return(encoder.zero()),
                FunctionMode::Mock => Resolution::CallThrough,
            },
            Some(Answer::Value(value)) => encode(&encoder, value.as_ref()),
            Some(Answer::Function(f)) => {
                let result = f(&call.args.values());
                self.encode_result(&encoder, result)
            }
            Some(Answer::Async(f)) => {
                let result = futures::executor::block_on(f(call.args.values()));
                self.encode_result(&encoder, result)
            }
            Some(Answer::Revert(reason)) => Resolution::Revert { reason },
        };

        Handled {
            call: Some(call),
            resolution,
        }
    }

    fn encode_result(&self, encoder: &ResponseEncoder, result: Result<Value, String>) -> Resolution {
        match result {
            Ok(value) => encode(encoder, Some(&value)),
            Err(reason) => Resolution::Failed {
                error: MockError::ResponseFunction {
                    function: self.name.to_string(),
                    reason,
                }
                .to_string(),
            },
        }
    }
}

fn encode(encoder: &ResponseEncoder, value: Option<&Value>) -> Resolution {
    match encoder.encode(value) {
        Ok(bytes) => Resolution::Return(bytes),
        Err(err) => Resolution::Failed {
            error: err.to_string(),
        },
    }
}

/// Rule under construction by [`ProgrammableFunction::when_called_with`].
#[must_use = "a rule is only installed by `returns` or `reverts`"]
pub struct WhenCalledWith {
    function: ProgrammableFunction,
    args: Vec<Value>,
}

impl WhenCalledWith {
    pub fn returns(self, value: impl Into<Value>) -> ProgrammableFunction {
        self.install(Answer::Value(Some(value.into())))
    }

    pub fn returns_with<F>(self, f: F) -> ProgrammableFunction
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.install(Answer::Function(Arc::new(move |args| Ok(f(args)))))
    }

    pub fn reverts(self) -> ProgrammableFunction {
        self.install(Answer::Revert(None))
    }

    pub fn reverts_with_reason(self, reason: impl Into<String>) -> ProgrammableFunction {
        self.install(Answer::Revert(Some(reason.into())))
    }

    fn install(self, answer: Answer) -> ProgrammableFunction {
        self.function
            .program(ResponseRule::ArgumentMatch(self.args, answer));
        self.function
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encoder::revert_payload,
        primitives::{
            Bytes,
            U256,
            address,
        },
    };
    use alloy_dyn_abi::JsonAbiExt;

    const TARGET: Address = address!("00000000000000000000000000000000000000f1");

    fn function(signature: &str, mode: FunctionMode) -> (ProgrammableFunction, Function) {
        let abi = Function::parse(signature).unwrap();
        (
            ProgrammableFunction::new(mode, TARGET, abi.clone()).unwrap(),
            abi,
        )
    }

    fn event(data: Vec<u8>) -> PreCallEvent {
        PreCallEvent {
            data: data.into(),
            value: U256::ZERO,
            recipient: TARGET,
            is_delegate: false,
            code_address: TARGET,
            caller: Address::ZERO,
        }
    }

    fn call_data(abi: &Function, args: &[alloy_dyn_abi::DynSolValue]) -> Vec<u8> {
        abi.abi_encode_input(args).unwrap()
    }

    fn uint(value: u64) -> alloy_dyn_abi::DynSolValue {
        alloy_dyn_abi::DynSolValue::Uint(U256::from(value), 256)
    }

    fn returned_uint(resolution: &Resolution) -> U256 {
        match resolution {
            Resolution::Return(bytes) => U256::from_be_slice(&bytes[..32]),
            other => panic!("expected a return, got {other:?}"),
        }
    }

    #[test]
    fn test_fake_answers_zero_without_rules() {
        let (f, abi) = function("function balanceOf(address) returns (uint256)", FunctionMode::Fake);
        let nonces = NonceSequence::new();
        let data = call_data(&abi, &[alloy_dyn_abi::DynSolValue::Address(TARGET)]);

        let handled = f.handle(&event(data), &nonces);
        assert_eq!(handled.resolution, Resolution::Return(Bytes::from(vec![0u8; 32])));
        assert_eq!(f.call_count(), 1);
    }

    #[test]
    fn test_mock_calls_through_without_rules() {
        let (f, abi) = function("function count() returns (uint256)", FunctionMode::Mock);
        let handled = f.handle(&event(call_data(&abi, &[])), &NonceSequence::new());
        assert_eq!(handled.resolution, Resolution::CallThrough);
    }

    #[test]
    fn test_rule_precedence() {
        let (f, abi) = function("function get(uint256) returns (uint256)", FunctionMode::Fake);
        let nonces = NonceSequence::new();
        f.returns(1u64).returns_at_call(1, 2u64);
        let _ = f.when_called_with([7u64]).returns(70u64);

        let seven = call_data(&abi, &[uint(7)]);
        let eight = call_data(&abi, &[uint(8)]);

        assert_eq!(returned_uint(&f.handle(&event(seven.clone()), &nonces).resolution), U256::from(70));
        assert_eq!(returned_uint(&f.handle(&event(seven), &nonces).resolution), U256::from(2));
        assert_eq!(returned_uint(&f.handle(&event(eight), &nonces).resolution), U256::from(1));
    }

    #[test]
    fn test_returns_with_sees_arguments() {
        let (f, abi) = function("function double(uint256) returns (uint256)", FunctionMode::Fake);
        f.returns_with(|args| match &args[0] {
            Value::Uint(v) => Value::Uint(*v * U256::from(2)),
            other => other.clone(),
        });

        let handled = f.handle(&event(call_data(&abi, &[uint(21)])), &NonceSequence::new());
        assert_eq!(returned_uint(&handled.resolution), U256::from(42));
    }

    #[test]
    fn test_failing_response_function_is_reported() {
        let (f, abi) = function("function get() returns (uint256)", FunctionMode::Fake);
        f.try_returns_with(|_| Err("boom".to_string()));

        let handled = f.handle(&event(call_data(&abi, &[])), &NonceSequence::new());
        match handled.resolution {
            Resolution::Failed { error } => assert!(error.contains("boom"), "{error}"),
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn test_unencodable_value_is_reported() {
        let (f, abi) = function("function get() returns (uint8)", FunctionMode::Fake);
        f.returns(300u64);

        let handled = f.handle(&event(call_data(&abi, &[])), &NonceSequence::new());
        match handled.resolution {
            Resolution::Failed { error } => {
                assert!(error.starts_with("Failed to encode return value for get()"), "{error}")
            }
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn test_reverts() {
        let (f, abi) = function("function get() returns (uint256)", FunctionMode::Fake);
        f.reverts_with_reason("nope");

        let handled = f.handle(&event(call_data(&abi, &[])), &NonceSequence::new());
        assert_eq!(
            handled.resolution,
            Resolution::Revert {
                reason: Some("nope".to_string())
            }
        );
        assert!(!revert_payload(Some("nope")).is_empty());
    }

    #[tokio::test]
    async fn test_async_response() {
        let (f, abi) = function("function get() returns (uint256)", FunctionMode::Fake);
        f.returns_async(|_| async { Ok(Value::from(5u64)) });

        let handled = tokio::task::spawn_blocking(move || {
            f.handle(&event(call_data(&abi, &[])), &NonceSequence::new())
        })
        .await
        .unwrap();
        assert_eq!(returned_uint(&handled.resolution), U256::from(5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_response_using_runtime_timers() {
        let (f, abi) = function("function get() returns (uint256)", FunctionMode::Fake);
        f.returns_async(|_| async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok(Value::from(6u64))
        });

        let handled = tokio::task::spawn_blocking(move || {
            f.handle(&event(call_data(&abi, &[])), &NonceSequence::new())
        })
        .await
        .unwrap();
        assert_eq!(returned_uint(&handled.resolution), U256::from(6));
    }

    #[test]
    fn test_subscribers_see_recorded_call() {
        let (f, abi) = function("function get(uint256) returns (uint256)", FunctionMode::Fake);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        f.subscribe(move |call| sink.lock().push(call.clone()));

        let handled = f.handle(&event(call_data(&abi, &[uint(3)])), &NonceSequence::new());
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(Arc::ptr_eq(&seen[0], handled.call.as_ref().unwrap()));
        assert!(f.history().called_with(&[3u64.into()]));
    }

    #[test]
    fn test_reset_clears_rules_and_history() {
        let (f, abi) = function("function get() returns (uint256)", FunctionMode::Fake);
        let nonces = NonceSequence::new();
        f.returns(9u64).returns_at_call(0, 1u64);
        f.handle(&event(call_data(&abi, &[])), &nonces);

        f.reset();
        assert_eq!(f.call_count(), 0);

        let handled = f.handle(&event(call_data(&abi, &[])), &nonces);
        assert_eq!(returned_uint(&handled.resolution), U256::ZERO);
        assert_eq!(f.get_call(0).unwrap().nonce, 1);
    }

    #[test]
    fn test_undecodable_arguments_fail_without_recording() {
        let (f, abi) = function("function get(uint256) returns (uint256)", FunctionMode::Fake);
        let nonces = NonceSequence::new();
        let handled = f.handle(&event(abi.selector().to_vec()), &nonces);

        assert!(handled.call.is_none());
        assert!(matches!(handled.resolution, Resolution::Failed { .. }));
        assert_eq!(f.call_count(), 0);
        assert_eq!(nonces.peek(), 0);
    }
}
