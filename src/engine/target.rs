use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, AppResult, EngineError};

use super::registry::TestData;

/// Result of one call into script-supplied code.
pub type InvokeResult = Result<Value, Box<dyn Error + Send + Sync>>;

/// Anything that can be called as a test body.
pub trait Invokeable: Send + Sync {
    /// # Errors
    ///
    /// Returns whatever failure the callable reports.
    fn invoke(&self) -> InvokeResult;
}

impl<F> Invokeable for F
where
    F: Fn() -> InvokeResult + Send + Sync,
{
    fn invoke(&self) -> InvokeResult {
        self()
    }
}

/// A value offered for instrumentation, by shape.
#[derive(Clone)]
pub enum TestTarget {
    Function(Arc<dyn Invokeable>),
    /// A callable already bound to its receiver.
    BoundMethod {
        name: String,
        call: Arc<dyn Invokeable>,
    },
    Object(Arc<dyn Invokeable>),
    /// Plain data; cannot be instrumented.
    Value(Value),
}

impl TestTarget {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            TestTarget::Function(_) => "function",
            TestTarget::BoundMethod { .. } => "bound method",
            TestTarget::Object(_) => "object",
            TestTarget::Value(Value::Null) => "null",
            TestTarget::Value(Value::Bool(_)) => "boolean",
            TestTarget::Value(Value::Number(_)) => "number",
            TestTarget::Value(Value::String(_)) => "string",
            TestTarget::Value(Value::Array(_)) => "array",
            TestTarget::Value(Value::Object(_)) => "map",
        }
    }
}

impl fmt::Debug for TestTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestTarget::BoundMethod { name, .. } => formatter
                .debug_struct("BoundMethod")
                .field("name", name)
                .finish_non_exhaustive(),
            TestTarget::Value(value) => formatter.debug_tuple("Value").field(value).finish(),
            TestTarget::Function(_) | TestTarget::Object(_) => formatter.write_str(self.kind()),
        }
    }
}

/// A callable bound to a registered test. Every invocation is timed and
/// counted in the test's statistics.
#[derive(Clone)]
pub struct InstrumentedTarget {
    test: Arc<TestData>,
    label: String,
    call: Arc<dyn Invokeable>,
}

impl InstrumentedTarget {
    /// Resolves `target` once, so invocations do not inspect its shape.
    pub(super) fn resolve(test: Arc<TestData>, target: TestTarget) -> AppResult<Self> {
        let kind = target.kind();
        let (label, call) = match target {
            TestTarget::Function(call) => ("function".to_owned(), call),
            TestTarget::BoundMethod { name, call } => (name, call),
            TestTarget::Object(call) => ("object".to_owned(), call),
            TestTarget::Value(_) => {
                return Err(AppError::engine(EngineError::NotInvokeable { kind }));
            }
        };
        Ok(Self { test, label, call })
    }

    #[must_use]
    pub fn test(&self) -> &TestData {
        &self.test
    }

    /// Calls the target and records the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvocationFailed`] if the target fails; the
    /// failure is counted as an error for the test.
    pub fn invoke(&self) -> AppResult<Value> {
        let started = Instant::now();
        let outcome = self.call.invoke();
        let number = self.test.descriptor().number;
        self.test.statistics().record(outcome.is_ok(), started.elapsed());
        outcome.map_err(|err| {
            debug!("Test {} ({}) failed: {}", number, self.label, err);
            AppError::engine(EngineError::InvocationFailed {
                test: number,
                message: err.to_string(),
            })
        })
    }
}

impl fmt::Debug for InstrumentedTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("InstrumentedTarget")
            .field("test", &self.test.descriptor().number)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
