use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Cannot wrap a {kind} as a test target; only callables can be instrumented.")]
    NotInvokeable { kind: &'static str },
    #[error("Test {test} failed: {message}")]
    InvocationFailed { test: u32, message: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
