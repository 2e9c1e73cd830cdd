//! WebSocket client driver for the echo verifier.
//!
//! Runs a single task that races the WebSocket stream against the verifier's
//! deadline and feeds every signal into [`EchoSequenceVerifier`]. Outbound
//! payloads queued by the verifier are flushed to the socket between events,
//! so the verifier itself never blocks.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, info, trace};

use crate::config::VerifyConfig;
use crate::error::SetupError;
use crate::step::Step;
use crate::verifier::{Connection, EchoSequenceVerifier, Outcome, ReadyState, Reporter, Timer};

/// Upper bound on waiting for our close frame to be written.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection handle owned by the verifier.
///
/// `send` only queues; the driver drains the queue onto the socket.
#[derive(Debug)]
pub struct WsConnection {
    outbox: VecDeque<String>,
    ready_state: ReadyState,
}

impl WsConnection {
    pub fn new() -> Self {
        Self {
            outbox: VecDeque::new(),
            ready_state: ReadyState::Connecting,
        }
    }

    pub fn set_ready_state(&mut self, state: ReadyState) {
        trace!(from = %self.ready_state, to = %state, "Ready state changed");
        self.ready_state = state;
    }

    /// Next queued outbound payload, if any.
    pub fn take_outbound(&mut self) -> Option<String> {
        self.outbox.pop_front()
    }
}

impl Default for WsConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for WsConnection {
    fn send(&mut self, payload: &str) {
        self.outbox.push_back(payload.to_string());
    }

    fn ready_state(&self) -> ReadyState {
        self.ready_state
    }
}

/// Deadline timer backed by the tokio clock.
///
/// Holds at most one armed deadline; the driver sleeps until it.
#[derive(Debug, Default)]
pub struct TokioTimer {
    armed: Option<(u64, Instant)>,
    next_id: u64,
}

impl TokioTimer {
    /// Instant at which the armed deadline fires.
    pub fn deadline(&self) -> Option<Instant> {
        self.armed.map(|(_, at)| at)
    }
}

impl Timer for TokioTimer {
    type Handle = u64;

    fn schedule(&mut self, duration: Duration) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.armed = Some((id, Instant::now() + duration));
        id
    }

    fn cancel(&mut self, handle: u64) {
        if matches!(self.armed, Some((id, _)) if id == handle) {
            self.armed = None;
        }
    }
}

pub type ClientVerifier<R> = EchoSequenceVerifier<WsConnection, TokioTimer, R>;

/// Run the configured echo sequence and return the outcome with the reporter.
pub async fn verify<R: Reporter>(
    config: &VerifyConfig,
    reporter: R,
) -> Result<(Outcome, R), SetupError> {
    run(&config.url, config.steps.clone(), config.deadline, reporter).await
}

/// Connect to `url` and drive `steps` to a single outcome within `deadline`.
pub async fn run<R: Reporter>(
    url: &str,
    steps: Vec<Step>,
    deadline: Duration,
    reporter: R,
) -> Result<(Outcome, R), SetupError> {
    let mut verifier = EchoSequenceVerifier::start(
        WsConnection::new(),
        TokioTimer::default(),
        reporter,
        steps,
        deadline,
    )?;

    debug!(url, "Connecting");
    let connected = tokio::select! {
        result = connect_async(url) => Some(result),
        _ = expiry(verifier.timer().deadline()) => None,
    };

    match connected {
        None => verifier.on_deadline_expired(),
        Some(Err(e)) => {
            verifier.connection_mut().set_ready_state(ReadyState::Closed);
            verifier.on_error(e);
        }
        Some(Ok((stream, response))) => {
            debug!(url, status = %response.status(), "Connected");
            verifier.connection_mut().set_ready_state(ReadyState::Open);
            verifier.on_open();
            exchange(stream, &mut verifier).await;
        }
    }

    let outcome = verifier.conclude();
    info!(
        url,
        passed = outcome.is_pass(),
        steps_completed = verifier.steps_completed(),
        "Verification finished"
    );

    Ok((outcome, verifier.into_reporter()))
}

/// Pump messages between the socket and the verifier until it is terminal.
async fn exchange<S, R>(stream: WebSocketStream<S>, verifier: &mut ClientVerifier<R>)
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: Reporter,
{
    let (mut sink, mut source) = stream.split();

    loop {
        while let Some(payload) = verifier.connection_mut().take_outbound() {
            trace!(len = payload.len(), "Sending message");
            if let Err(e) = sink.send(Message::text(payload)).await {
                verifier.on_error(e);
                break;
            }
        }

        if verifier.is_terminal() {
            break;
        }

        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    trace!(len = text.len(), "Received text message");
                    verifier.on_message(text.as_str());
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(len = data.len(), "Received binary message");
                    verifier.on_message(&String::from_utf8_lossy(&data));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Close frame received");
                    verifier.connection_mut().set_ready_state(ReadyState::Closed);
                    verifier.on_close();
                }
                // Ping/pong are answered by the protocol layer.
                Some(Ok(_)) => {}
                Some(Err(e)) => verifier.on_error(e),
                None => {
                    debug!("Stream ended");
                    verifier.connection_mut().set_ready_state(ReadyState::Closed);
                    verifier.on_close();
                }
            },
            _ = expiry(verifier.timer().deadline()) => verifier.on_deadline_expired(),
        }
    }

    if verifier.connection().ready_state() != ReadyState::Closed {
        verifier.connection_mut().set_ready_state(ReadyState::Closing);
    }
    match timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => trace!("Connection closed"),
        Ok(Err(e)) => debug!(error = %e, "Close did not complete cleanly"),
        Err(_) => debug!("Timed out closing connection"),
    }
    verifier.connection_mut().set_ready_state(ReadyState::Closed);
}

/// Resolves when `deadline` passes; never resolves if no deadline is armed.
async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
