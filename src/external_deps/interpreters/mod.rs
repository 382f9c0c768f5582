//! JavaScript interpreter infrastructure.
//!
//! Soft-block pages ship a short obfuscated script whose only effect is to
//! assign `document.cookie`; the interpreter runs it in a stub browser
//! environment and hands the assignment back.

mod boa;

pub use boa::BoaJavascriptInterpreter;

use thiserror::Error;

/// Abstraction over JavaScript runtimes.
pub trait JavascriptInterpreter: Send + Sync {
    /// Execute raw JavaScript and return the completion value as a string.
    fn execute(&self, script: &str, host: &str) -> Result<String, InterpreterError>;

    /// Execute `script` and return whatever it assigned to `document.cookie`.
    fn document_cookie(&self, script: &str, host: &str) -> Result<String, InterpreterError>;
}

/// Failures produced by JavaScript runtimes.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("javascript execution failed: {0}")]
    Execution(String),
    #[error("javascript engine error: {0}")]
    Other(String),
}

/// Convenience alias for runtime results.
pub type InterpreterResult<T> = Result<T, InterpreterError>;
