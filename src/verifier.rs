//! Echo sequence verifier.
//!
//! A sans-IO state machine that walks a connection through an ordered list
//! of send/expect-echo steps. The surrounding event loop feeds it the
//! connection's open, message, close and error signals plus the expiry of a
//! single deadline; the verifier reacts by sending the next payload through
//! its [`Connection`] and reports exactly one outcome through its
//! [`Reporter`].
//!
//! ## State Machine
//!
//! ```text
//! Connecting --open--> Open --all echoes + close--> Completed
//!     |                 |
//!     |                 +--mismatch / error / early close--> Failed
//!     |                 +--deadline--> TimedOut
//!     +--error--> Failed
//!     +--deadline--> TimedOut
//! ```
//!
//! Terminal states are sticky: once one is reached every later signal is
//! ignored and the deadline is no longer armed.

use std::fmt;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{SetupError, VerifyError};
use crate::step::Step;

/// Diagnostic state of the underlying connection.
///
/// Mirrors the numeric WebSocket `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub fn as_u8(self) -> u8 {
        match self {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ReadyState::Connecting => "CONNECTING",
            ReadyState::Open => "OPEN",
            ReadyState::Closing => "CLOSING",
            ReadyState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}

/// Session state of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Completed,
    Failed,
    TimedOut,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::TimedOut
        )
    }
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(VerifyError),
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Passed)
    }
}

/// Outbound side of the connection under test.
pub trait Connection {
    /// Queue a payload for sending. Must not block.
    fn send(&mut self, payload: &str);

    /// Current ready state, used for diagnostics.
    fn ready_state(&self) -> ReadyState;
}

/// One-shot deadline timer.
pub trait Timer {
    type Handle;

    fn schedule(&mut self, duration: Duration) -> Self::Handle;

    fn cancel(&mut self, handle: Self::Handle);
}

/// Receives the outcome of a run.
///
/// `report_success` and `report_failure` are each invoked at most once per
/// run, and never both.
pub trait Reporter {
    fn report_success(&mut self);

    fn report_failure(&mut self, reason: &VerifyError);

    /// Progress line such as `Connected.` or `Closed.`.
    fn note(&mut self, _line: &str) {}

    /// A step's echo matched.
    fn step_passed(&mut self, _index: usize, _step: &Step) {}
}

/// Drives a connection through a fixed sequence of echo steps.
pub struct EchoSequenceVerifier<C, T: Timer, R> {
    connection: C,
    timer: T,
    reporter: R,
    steps: Vec<Step>,
    /// Index of the step whose echo is awaited.
    cursor: usize,
    state: SessionState,
    deadline: Option<T::Handle>,
    outcome: Option<Outcome>,
}

impl<C, T, R> EchoSequenceVerifier<C, T, R>
where
    C: Connection,
    T: Timer,
    R: Reporter,
{
    /// Create a verifier and arm its deadline.
    ///
    /// The first outbound payload is sent when [`on_open`](Self::on_open) is
    /// called.
    pub fn start(
        connection: C,
        mut timer: T,
        reporter: R,
        steps: Vec<Step>,
        deadline: Duration,
    ) -> Result<Self, SetupError> {
        if steps.is_empty() {
            return Err(SetupError::EmptySequence);
        }
        if deadline.is_zero() {
            return Err(SetupError::ZeroDeadline);
        }

        let handle = timer.schedule(deadline);
        debug!(
            steps = steps.len(),
            deadline_ms = deadline.as_millis() as u64,
            "Verifier armed"
        );

        Ok(Self {
            connection,
            timer,
            reporter,
            steps,
            cursor: 0,
            state: SessionState::Connecting,
            deadline: Some(handle),
            outcome: None,
        })
    }

    /// The connection reported that it is open.
    pub fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            trace!(state = ?self.state, "Ignoring open signal");
            return;
        }

        self.state = SessionState::Open;
        self.reporter.note("Connected.");
        self.connection.send(&self.steps[0].outbound);
    }

    /// A message arrived from the server.
    pub fn on_message(&mut self, payload: &str) {
        match self.state {
            SessionState::Open => {}
            SessionState::Connecting => {
                warn!("Ignoring message received before open");
                return;
            }
            _ => {
                trace!(state = ?self.state, "Ignoring late message");
                return;
            }
        }

        let Some(step) = self.steps.get(self.cursor) else {
            let err = VerifyError::UnexpectedMessage {
                actual: payload.to_string(),
            };
            self.finish(SessionState::Failed, Outcome::Failed(err));
            return;
        };

        if payload != step.expected {
            let err = VerifyError::Mismatch {
                step: self.cursor,
                expected: step.expected.clone(),
                actual: payload.to_string(),
            };
            self.finish(SessionState::Failed, Outcome::Failed(err));
            return;
        }

        self.reporter.step_passed(self.cursor, step);
        self.cursor += 1;

        if let Some(next) = self.steps.get(self.cursor) {
            self.connection.send(&next.outbound);
        }
    }

    /// The connection closed.
    pub fn on_close(&mut self) {
        if self.state.is_terminal() {
            trace!(state = ?self.state, "Ignoring close after outcome");
            return;
        }

        self.reporter.note("Closed.");

        if self.all_steps_satisfied() {
            self.finish(SessionState::Completed, Outcome::Passed);
        } else {
            let err = VerifyError::Connection(format!(
                "closed after {} of {} steps",
                self.cursor,
                self.steps.len()
            ));
            self.finish(SessionState::Failed, Outcome::Failed(err));
        }
    }

    /// The connection failed at the transport level.
    pub fn on_error(&mut self, cause: impl fmt::Display) {
        if self.state.is_terminal() {
            trace!(state = ?self.state, error = %cause, "Ignoring error after outcome");
            return;
        }

        let err = VerifyError::Connection(cause.to_string());
        self.finish(SessionState::Failed, Outcome::Failed(err));
    }

    /// The deadline timer fired.
    pub fn on_deadline_expired(&mut self) {
        if self.state.is_terminal() {
            trace!(state = ?self.state, "Ignoring deadline after outcome");
            return;
        }

        // The handle has fired; there is nothing left to cancel.
        self.deadline = None;
        let err = VerifyError::Timeout {
            state: self.connection.ready_state(),
        };
        self.finish(SessionState::TimedOut, Outcome::Failed(err));
    }

    fn finish(&mut self, state: SessionState, outcome: Outcome) {
        debug_assert!(state.is_terminal());
        if self.state.is_terminal() {
            return;
        }

        self.state = state;
        if let Some(handle) = self.deadline.take() {
            self.timer.cancel(handle);
        }

        match &outcome {
            Outcome::Passed => self.reporter.report_success(),
            Outcome::Failed(err) => self.reporter.report_failure(err),
        }
        debug!(state = ?state, "Verifier finished");
        self.outcome = Some(outcome);
    }

    /// Close out the run and return its outcome.
    ///
    /// Treats an unfinished run as closed by the peer.
    pub fn conclude(&mut self) -> Outcome {
        self.on_close();
        match &self.outcome {
            Some(outcome) => outcome.clone(),
            None => {
                let err = VerifyError::Connection("run ended without an outcome".to_string());
                Outcome::Failed(err)
            }
        }
    }

    fn all_steps_satisfied(&self) -> bool {
        self.cursor == self.steps.len()
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The reported outcome, once a terminal state is reached.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Number of steps whose echo matched.
    pub fn steps_completed(&self) -> usize {
        self.cursor
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Get a reference to the reporter for testing
    #[cfg(test)]
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn into_reporter(self) -> R {
        self.reporter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::echo_sequence;

    #[derive(Default)]
    struct MockConnection {
        sent: Vec<String>,
        ready: Option<ReadyState>,
    }

    impl Connection for MockConnection {
        fn send(&mut self, payload: &str) {
            self.sent.push(payload.to_string());
        }

        fn ready_state(&self) -> ReadyState {
            self.ready.unwrap_or(ReadyState::Connecting)
        }
    }

    #[derive(Default)]
    struct MockTimer {
        scheduled: Vec<Duration>,
        cancelled: Vec<usize>,
    }

    impl Timer for MockTimer {
        type Handle = usize;

        fn schedule(&mut self, duration: Duration) -> usize {
            self.scheduled.push(duration);
            self.scheduled.len() - 1
        }

        fn cancel(&mut self, handle: usize) {
            self.cancelled.push(handle);
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        successes: usize,
        failures: Vec<VerifyError>,
        notes: Vec<String>,
        passed: Vec<usize>,
    }

    impl Reporter for RecordingReporter {
        fn report_success(&mut self) {
            self.successes += 1;
        }

        fn report_failure(&mut self, reason: &VerifyError) {
            self.failures.push(reason.clone());
        }

        fn note(&mut self, line: &str) {
            self.notes.push(line.to_string());
        }

        fn step_passed(&mut self, index: usize, _step: &Step) {
            self.passed.push(index);
        }
    }

    type TestVerifier = EchoSequenceVerifier<MockConnection, MockTimer, RecordingReporter>;

    fn verifier(messages: &[&str]) -> TestVerifier {
        EchoSequenceVerifier::start(
            MockConnection::default(),
            MockTimer::default(),
            RecordingReporter::default(),
            echo_sequence(messages.iter().copied()),
            Duration::from_millis(3000),
        )
        .unwrap()
    }

    fn reports(v: &TestVerifier) -> usize {
        v.reporter().successes + v.reporter().failures.len()
    }

    #[test]
    fn test_start_rejects_empty_sequence() {
        let result = EchoSequenceVerifier::start(
            MockConnection::default(),
            MockTimer::default(),
            RecordingReporter::default(),
            Vec::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(SetupError::EmptySequence)));
    }

    #[test]
    fn test_start_rejects_zero_deadline() {
        let result = EchoSequenceVerifier::start(
            MockConnection::default(),
            MockTimer::default(),
            RecordingReporter::default(),
            echo_sequence(["a"]),
            Duration::ZERO,
        );
        assert!(matches!(result, Err(SetupError::ZeroDeadline)));
    }

    #[test]
    fn test_start_arms_deadline_and_waits_for_open() {
        let v = verifier(&["first"]);
        assert_eq!(v.timer().scheduled, vec![Duration::from_millis(3000)]);
        assert_eq!(v.state(), SessionState::Connecting);
        assert!(v.connection().sent.is_empty());
    }

    #[test]
    fn test_two_step_success() {
        let mut v = verifier(&["first", "second"]);

        v.on_open();
        assert_eq!(v.connection().sent, vec!["first"]);

        v.on_message("first");
        assert_eq!(v.connection().sent, vec!["first", "second"]);

        v.on_message("second");
        assert_eq!(v.connection().sent.len(), 2);
        assert_eq!(v.state(), SessionState::Open);
        assert_eq!(reports(&v), 0);

        v.on_close();
        assert_eq!(v.state(), SessionState::Completed);
        assert_eq!(v.outcome(), Some(&Outcome::Passed));
        assert_eq!(v.reporter().successes, 1);
        assert!(v.reporter().failures.is_empty());
        assert_eq!(v.reporter().passed, vec![0, 1]);
        assert_eq!(v.reporter().notes, vec!["Connected.", "Closed."]);
        assert_eq!(v.timer().cancelled, vec![0]);
    }

    #[test]
    fn test_mismatch_fails_immediately() {
        let mut v = verifier(&["first", "second"]);
        v.on_open();
        v.on_message("WRONG");

        assert_eq!(v.state(), SessionState::Failed);
        assert_eq!(
            v.reporter().failures,
            vec![VerifyError::Mismatch {
                step: 0,
                expected: "first".to_string(),
                actual: "WRONG".to_string(),
            }]
        );
        assert_eq!(v.timer().cancelled, vec![0]);
        // The second payload is never sent.
        assert_eq!(v.connection().sent, vec!["first"]);
    }

    #[test]
    fn test_mismatch_on_second_step() {
        let mut v = verifier(&["first", "second"]);
        v.on_open();
        v.on_message("first");
        v.on_message("SECOND?");

        assert_eq!(v.steps_completed(), 1);
        match v.outcome() {
            Some(Outcome::Failed(VerifyError::Mismatch { step, actual, .. })) => {
                assert_eq!(*step, 1);
                assert_eq!(actual, "SECOND?");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_before_open() {
        let mut v = verifier(&["first", "second"]);
        v.on_deadline_expired();

        assert_eq!(v.state(), SessionState::TimedOut);
        assert_eq!(
            v.reporter().failures,
            vec![VerifyError::Timeout {
                state: ReadyState::Connecting
            }]
        );
        // An expired deadline is not cancelled.
        assert!(v.timer().cancelled.is_empty());
    }

    #[test]
    fn test_timeout_while_open_reports_ready_state() {
        let mut v = verifier(&["first"]);
        v.on_open();
        v.connection_mut().ready = Some(ReadyState::Open);
        v.on_deadline_expired();

        assert_eq!(
            v.outcome(),
            Some(&Outcome::Failed(VerifyError::Timeout {
                state: ReadyState::Open
            }))
        );
    }

    #[test]
    fn test_late_signals_do_not_report_twice() {
        let mut v = verifier(&["first"]);
        v.on_open();
        v.on_message("first");
        v.on_close();
        assert_eq!(v.reporter().successes, 1);

        v.on_deadline_expired();
        v.on_message("first");
        v.on_close();
        v.on_error("reset");
        v.on_open();

        assert_eq!(reports(&v), 1);
        assert_eq!(v.state(), SessionState::Completed);
        assert_eq!(v.timer().cancelled, vec![0]);
        assert_eq!(v.connection().sent, vec!["first"]);
    }

    #[test]
    fn test_close_after_mismatch_is_not_a_second_report() {
        let mut v = verifier(&["first"]);
        v.on_open();
        v.on_message("WRONG");
        v.on_close();
        v.on_deadline_expired();

        assert_eq!(reports(&v), 1);
        assert_eq!(v.state(), SessionState::Failed);
        assert_eq!(v.reporter().notes, vec!["Connected."]);
    }

    #[test]
    fn test_early_close_fails() {
        let mut v = verifier(&["first", "second"]);
        v.on_open();
        v.on_message("first");
        v.on_close();

        assert_eq!(v.state(), SessionState::Failed);
        assert_eq!(
            v.reporter().failures,
            vec![VerifyError::Connection("closed after 1 of 2 steps".to_string())]
        );
    }

    #[test]
    fn test_connection_error_before_open() {
        let mut v = verifier(&["first"]);
        v.on_error("connection refused");

        assert_eq!(v.state(), SessionState::Failed);
        assert_eq!(
            v.reporter().failures,
            vec![VerifyError::Connection("connection refused".to_string())]
        );
        assert_eq!(v.timer().cancelled, vec![0]);
    }

    #[test]
    fn test_connection_error_while_open() {
        let mut v = verifier(&["first", "second"]);
        v.on_open();
        v.on_message("first");
        v.on_error("connection reset by peer");

        assert_eq!(v.state(), SessionState::Failed);
        assert_eq!(
            v.outcome(),
            Some(&Outcome::Failed(VerifyError::Connection(
                "connection reset by peer".to_string()
            )))
        );
        assert_eq!(reports(&v), 1);
        assert_eq!(v.timer().cancelled, vec![0]);

        v.on_close();
        v.on_deadline_expired();
        assert_eq!(reports(&v), 1);
    }

    #[test]
    fn test_conclude_returns_reported_outcome() {
        let mut v = verifier(&["first"]);
        v.on_open();
        v.on_message("first");
        v.on_close();

        assert_eq!(v.conclude(), Outcome::Passed);
        assert_eq!(reports(&v), 1);
    }

    #[test]
    fn test_conclude_closes_unfinished_run() {
        let mut v = verifier(&["first", "second"]);
        v.on_open();

        assert_eq!(
            v.conclude(),
            Outcome::Failed(VerifyError::Connection(
                "closed after 0 of 2 steps".to_string()
            ))
        );
        assert_eq!(v.state(), SessionState::Failed);
        assert_eq!(reports(&v), 1);
    }

    #[test]
    fn test_extra_message_after_last_step() {
        let mut v = verifier(&["first"]);
        v.on_open();
        v.on_message("first");
        v.on_message("bonus");

        assert_eq!(
            v.outcome(),
            Some(&Outcome::Failed(VerifyError::UnexpectedMessage {
                actual: "bonus".to_string()
            }))
        );
    }

    #[test]
    fn test_message_before_open_is_ignored() {
        let mut v = verifier(&["first"]);
        v.on_message("first");
        assert_eq!(v.state(), SessionState::Connecting);
        assert_eq!(v.steps_completed(), 0);
        assert_eq!(reports(&v), 0);
    }

    #[test]
    fn test_ready_state_display() {
        assert_eq!(ReadyState::Connecting.to_string(), "CONNECTING (0)");
        assert_eq!(ReadyState::Closed.to_string(), "CLOSED (3)");
        assert_eq!(ReadyState::Closing.as_u8(), 2);
    }
}
