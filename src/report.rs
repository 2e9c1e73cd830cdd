//! Reporters for verification outcomes.
//!
//! - `LogReporter`: emits progress and the outcome through `tracing`
//! - `Transcript`: collects layout-test style output
//!
//! A transcript for a passing run of the default sequence looks like:
//!
//! ```text
//! Web Socket send test
//!
//! On success, you will see a series of "PASS" messages, followed by "TEST COMPLETE".
//!
//! Connected.
//! PASS data is "This is the first message to send to the server."
//! PASS data is "This is the second."
//! Closed.
//!
//! TEST COMPLETE
//! ```

use tracing::{debug, error, info};

use crate::error::VerifyError;
use crate::step::Step;
use crate::verifier::Reporter;

/// Description line printed at the top of a transcript.
pub const DEFAULT_DESCRIPTION: &str = "Web Socket send test";

const PREAMBLE: &str =
    "On success, you will see a series of \"PASS\" messages, followed by \"TEST COMPLETE\".";

const COMPLETE: &str = "TEST COMPLETE";

/// Reports through the tracing subscriber.
#[derive(Debug, Default)]
pub struct LogReporter {
    url: String,
}

impl LogReporter {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Reporter for LogReporter {
    fn report_success(&mut self) {
        info!(url = %self.url, "Echo sequence passed");
    }

    fn report_failure(&mut self, reason: &VerifyError) {
        error!(url = %self.url, reason = %reason, "Echo sequence failed");
    }

    fn note(&mut self, line: &str) {
        debug!(url = %self.url, "{line}");
    }

    fn step_passed(&mut self, index: usize, step: &Step) {
        debug!(step = index, payload = %step.expected, "Echo matched");
    }
}

/// Collects the run as layout-test output lines.
#[derive(Debug)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn new(description: &str) -> Self {
        Self {
            lines: vec![
                description.to_string(),
                String::new(),
                PREAMBLE.to_string(),
                String::new(),
            ],
        }
    }

    #[cfg(test)]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// `true` once an outcome was recorded.
    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.lines.last().is_some_and(|line| line == COMPLETE)
    }

    /// Render the transcript, one line per entry with a trailing newline.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    fn complete(&mut self) {
        self.lines.push(String::new());
        self.lines.push(COMPLETE.to_string());
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(DEFAULT_DESCRIPTION)
    }
}

impl Reporter for Transcript {
    fn report_success(&mut self) {
        self.complete();
    }

    fn report_failure(&mut self, reason: &VerifyError) {
        self.lines.push(format!("FAIL {reason}"));
        self.complete();
    }

    fn note(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn step_passed(&mut self, _index: usize, step: &Step) {
        self.lines.push(format!("PASS data is \"{}\"", step.expected));
    }
}

/// Forwards every call to two reporters.
pub struct Tee<A, B>(pub A, pub B);

impl<A: Reporter, B: Reporter> Reporter for Tee<A, B> {
    fn report_success(&mut self) {
        self.0.report_success();
        self.1.report_success();
    }

    fn report_failure(&mut self, reason: &VerifyError) {
        self.0.report_failure(reason);
        self.1.report_failure(reason);
    }

    fn note(&mut self, line: &str) {
        self.0.note(line);
        self.1.note(line);
    }

    fn step_passed(&mut self, index: usize, step: &Step) {
        self.0.step_passed(index, step);
        self.1.step_passed(index, step);
    }
}
