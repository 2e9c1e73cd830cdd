//! Echo steps: one outbound payload paired with the payload expected back.

/// First payload of the default sequence.
pub const FIRST_MESSAGE_TO_SEND: &str = "This is the first message to send to the server.";

/// Second payload of the default sequence.
pub const SECOND_MESSAGE_TO_SEND: &str = "This is the second.";

/// A single send/expect-receive pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Payload sent to the server.
    pub outbound: String,
    /// Payload the server must send back next.
    pub expected: String,
}

impl Step {
    #[cfg(test)]
    pub fn new(outbound: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            outbound: outbound.into(),
            expected: expected.into(),
        }
    }

    /// A step whose expected reply is the outbound payload itself.
    pub fn echo(payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self {
            expected: payload.clone(),
            outbound: payload,
        }
    }
}

/// Build an echo sequence from a list of messages.
pub fn echo_sequence<I, S>(messages: I) -> Vec<Step>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    messages.into_iter().map(Step::echo).collect()
}

/// The default two-step echo sequence.
#[cfg(test)]
pub fn default_sequence() -> Vec<Step> {
    echo_sequence(default_messages())
}

pub fn default_messages() -> Vec<String> {
    vec![
        FIRST_MESSAGE_TO_SEND.to_string(),
        SECOND_MESSAGE_TO_SEND.to_string(),
    ]
}
