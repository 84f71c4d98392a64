//! Programmed responses of one function.
//!
//! For call index `i` the answer comes from, in order: the `AtCall(i)` rule, the most
//! recently set `ArgumentMatch` rule whose arguments deep-equal the call's, the `Default`
//! rule. When none applies the function answers with its zero value (fakes) or lets the
//! real code run (mocks).

use crate::{
    history::CallArguments,
    matcher,
    primitives::Bytes,
    value::Value,
};
use futures::future::BoxFuture;
use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
};

/// Synchronous response function of the call arguments.
pub type ResponseFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Asynchronous response function of the call arguments.
pub type AsyncResponseFn =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// What a rule answers with.
#[derive(Clone)]
pub enum Answer {
    /// A fixed value. `None` answers with the zero value of the return type.
    Value(Option<Value>),
    Function(ResponseFn),
    Async(AsyncResponseFn),
    /// Revert with an optional reason string.
    Revert(Option<String>),
}

impl fmt::Debug for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Answer::Function(_) => f.write_str("Function(..)"),
            Answer::Async(_) => f.write_str("Async(..)"),
            Answer::Revert(reason) => f.debug_tuple("Revert").field(reason).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResponseRule {
    Default(Answer),
    AtCall(usize, Answer),
    ArgumentMatch(Vec<Value>, Answer),
}

/// Outcome of answering one intercepted call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Return these bytes to the caller.
    Return(Bytes),
    /// Revert, with an `Error(string)` payload when a reason is set.
    Revert { reason: Option<String> },
    /// Execute the contract's own code.
    CallThrough,
    /// The call could not be answered as programmed.
    Failed { error: String },
}

impl Resolution {
    /// Message a caller-facing environment reports for a reverted or failed call.
    pub fn describe(&self) -> Option<String> {
        match self {
            Resolution::Revert { reason: Some(reason) } => Some(format!(
                "VM Exception while processing transaction: revert {reason}"
            )),
            Resolution::Revert { reason: None } => {
                Some("VM Exception while processing transaction: revert".to_string())
            }
            Resolution::Failed { error } => Some(error.clone()),
            Resolution::Return(_) | Resolution::CallThrough => None,
        }
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, Resolution::Revert { .. })
    }
}

/// Rule table plus call-index cursor of one function.
#[derive(Debug, Clone, Default)]
pub struct ResponseProgram {
    default: Option<Answer>,
    at_call: BTreeMap<usize, Answer>,
    argument_matches: Vec<(Vec<Value>, Answer)>,
    cursor: usize,
}

impl ResponseProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `rule`, replacing the rule it overwrites.
    pub fn set(&mut self, rule: ResponseRule) {
        match rule {
            ResponseRule::Default(answer) => self.default = Some(answer),
            ResponseRule::AtCall(index, answer) => {
                self.at_call.insert(index, answer);
            }
            ResponseRule::ArgumentMatch(args, answer) => {
                self.argument_matches
                    .retain(|(existing, _)| !matcher::arguments_equal(existing, &args));
                self.argument_matches.push((args, answer));
            }
        }
    }

    /// Takes the index of the next call.
    pub fn next_index(&mut self) -> usize {
        let index = self.cursor;
        self.cursor += 1;
        index
    }

    /// Number of calls the program has answered since the last reset.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Picks the answer for call `index` with arguments `args`.
    pub fn resolve(&self, index: usize, args: &CallArguments) -> Option<&Answer> {
        if let Some(answer) = self.at_call.get(&index) {
            return Some(answer);
        }
        if let Some((_, answer)) = self
            .argument_matches
            .iter()
            .rev()
            .find(|(expected, _)| args.matches(expected))
        {
            return Some(answer);
        }
        self.default.as_ref()
    }

    /// Whether any rule is installed.
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.at_call.is_empty() && self.argument_matches.is_empty()
    }

    /// Drops all rules and rewinds the cursor.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
