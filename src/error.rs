//! Error types for echo verification.

use thiserror::Error;

use crate::verifier::ReadyState;

/// Terminal failure of a verification run.
///
/// Exactly one of these is reported per run, and only if the run did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// The echoed payload differs from the expected one.
    #[error("step {step}: expected {expected:?} but received {actual:?}")]
    Mismatch {
        /// Zero-based index of the step that failed.
        step: usize,
        expected: String,
        actual: String,
    },

    /// A message arrived after every step was satisfied.
    #[error("unexpected message after the last step: {actual:?}")]
    UnexpectedMessage { actual: String },

    /// The deadline elapsed before the run reached a terminal state.
    #[error("Timed out in state: {state}")]
    Timeout { state: ReadyState },

    /// Transport-level failure surfaced by the connection.
    #[error("connection error: {0}")]
    Connection(String),
}

/// Invalid arguments to `EchoSequenceVerifier::start`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("step sequence must not be empty")]
    EmptySequence,

    #[error("deadline must be greater than zero")]
    ZeroDeadline,
}
