//! The two forwarding directions of a running session.
//!
//! Each pump runs on its own task. Whichever one detects termination first
//! moves the session to `Closing` and cancels the shared token; the other
//! observes the cancellation and stops.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message as WsMessage;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::SessionHandle;
use crate::error::PtyServerError;
use crate::protocol::{self, Message, Utf8Decoder};
use crate::pty::{ChildStatus, PtySize, SharedPty};
use crate::Result;

/// Why a forwarding direction stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The shell exited and its remaining output was drained.
    ShellExited,
    /// The PTY reported end-of-stream.
    PtyEof,
    /// The client closed the connection.
    ClientClosed,
    /// Reading from or writing to the WebSocket failed.
    SocketError(String),
    /// Writing to or resizing the PTY failed.
    PtyError(String),
    /// The other direction (or a shutdown request) stopped the session.
    Cancelled,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::ShellExited => write!(f, "shell exited"),
            Termination::PtyEof => write!(f, "pty closed"),
            Termination::ClientClosed => write!(f, "client closed"),
            Termination::SocketError(e) => write!(f, "socket error: {}", e),
            Termination::PtyError(e) => write!(f, "pty error: {}", e),
            Termination::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a client frame asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Bytes to write to the PTY verbatim.
    Input(Vec<u8>),
    /// New window size.
    Resize(PtySize),
    /// Dropped without effect; the reason is logged.
    Ignored(&'static str),
    /// The client is closing the connection.
    Closed,
}

/// Interpret one WebSocket frame from the client.
pub fn classify(frame: &WsMessage) -> ClientFrame {
    match frame {
        WsMessage::Text(text) => match protocol::decode(text.as_str()) {
            Some(Message::Input { data }) => ClientFrame::Input(data.into_bytes()),
            Some(Message::Resize { cols, rows }) => ClientFrame::Resize(PtySize::new(rows, cols)),
            Some(Message::Output { .. }) | Some(Message::Exit { .. }) => {
                ClientFrame::Ignored("server-only message")
            }
            None => ClientFrame::Ignored("malformed message"),
        },
        WsMessage::Binary(bytes) => ClientFrame::Input(bytes.to_vec()),
        WsMessage::Ping(_) | WsMessage::Pong(_) => ClientFrame::Ignored("control frame"),
        WsMessage::Close(_) => ClientFrame::Closed,
    }
}

/// Timing bounds of the shell-to-client direction.
#[derive(Debug, Clone, Copy)]
pub struct OutputTiming {
    /// How long to keep forwarding output after the shell exited or the
    /// session was cancelled.
    pub flush_grace: Duration,
    /// How long to wait for the exit status after PTY end-of-stream.
    pub exit_wait: Duration,
}

impl Default for OutputTiming {
    fn default() -> Self {
        Self {
            flush_grace: Duration::from_millis(250),
            exit_wait: Duration::from_secs(2),
        }
    }
}

/// Apply a window size on a blocking thread.
pub(crate) async fn apply_resize(pty: &Arc<SharedPty>, size: PtySize) -> Result<()> {
    let pty = Arc::clone(pty);
    tokio::task::spawn_blocking(move || pty.resize(size))
        .await
        .map_err(|e| PtyServerError::Pty(format!("resize task failed: {}", e)))?
}

async fn send_message<S>(sink: &mut S, message: &Message) -> std::result::Result<(), String>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    sink.send(WsMessage::Text(protocol::encode(message).into()))
        .await
        .map_err(|e| e.to_string())
}

async fn send_output<S>(
    sink: &mut S,
    decoder: &mut Utf8Decoder,
    bytes: &[u8],
) -> std::result::Result<(), String>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    let text = decoder.decode(bytes);
    if text.is_empty() {
        // Only the start of a multi-byte sequence; it goes out with the next chunk.
        return Ok(());
    }
    trace!(bytes = bytes.len(), "forwarding output");
    send_message(sink, &Message::output(text)).await
}

async fn wait_for_status(
    exit: &mut watch::Receiver<ChildStatus>,
    bound: Duration,
) -> ChildStatus {
    let observed = async { exit.wait_for(|s| !s.is_running()).await.map(|s| *s) };
    match tokio::time::timeout(bound, observed).await {
        Ok(Ok(status)) => status,
        Ok(Err(_)) => ChildStatus::Unknown,
        Err(_) => ChildStatus::Running,
    }
}

/// Shell to client: forward PTY output, then report the exit status.
///
/// Every non-empty chunk becomes one `output` frame, in order. When the
/// shell ends on its own, exactly one `exit` frame follows the output if the
/// status is observed in time. On cancellation, output that was already
/// read is flushed and no `exit` frame is sent. The sink is closed before
/// returning.
pub async fn pump_output<S>(
    mut sink: S,
    mut output: mpsc::Receiver<Vec<u8>>,
    mut exit: watch::Receiver<ChildStatus>,
    handle: Arc<SessionHandle>,
    timing: OutputTiming,
) -> Termination
where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    let cancel = handle.cancel_token().clone();
    let mut decoder = Utf8Decoder::new();
    let mut status: Option<ChildStatus> = None;
    let mut drain_until: Option<Instant> = None;

    let termination = loop {
        let deadline = drain_until.unwrap_or_else(Instant::now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Termination::Cancelled,
            chunk = output.recv() => match chunk {
                Some(bytes) => {
                    if let Err(e) = send_output(&mut sink, &mut decoder, &bytes).await {
                        break Termination::SocketError(e);
                    }
                }
                None => break Termination::PtyEof,
            },
            // The borrowed `Ref` must not outlive the branch future.
            observed = async { exit.wait_for(|s| !s.is_running()).await.map(|s| *s) },
                if status.is_none() =>
            {
                let observed = observed.unwrap_or(ChildStatus::Unknown);
                debug!(session = %handle.id(), ?observed, "shell exit observed, draining output");
                status = Some(observed);
                drain_until = Some(Instant::now() + timing.flush_grace);
            }
            _ = tokio::time::sleep_until(deadline), if drain_until.is_some() => {
                break Termination::ShellExited;
            }
        }
    };

    handle.begin_close();

    match &termination {
        Termination::Cancelled => {
            let deadline = Instant::now() + timing.flush_grace;
            while Instant::now() < deadline {
                let Ok(bytes) = output.try_recv() else { break };
                let sent = tokio::time::timeout_at(
                    deadline,
                    send_output(&mut sink, &mut decoder, &bytes),
                )
                .await;
                if !matches!(sent, Ok(Ok(()))) {
                    break;
                }
            }
            let rest = decoder.finish();
            if !rest.is_empty() {
                let _ = send_message(&mut sink, &Message::output(rest)).await;
            }
        }
        Termination::PtyEof | Termination::ShellExited => {
            let rest = decoder.finish();
            if !rest.is_empty() {
                let _ = send_message(&mut sink, &Message::output(rest)).await;
            }

            let status = match status {
                Some(status) => status,
                None => wait_for_status(&mut exit, timing.exit_wait).await,
            };
            match status.code() {
                Some(code) => {
                    if let Err(e) = send_message(&mut sink, &Message::exit(code)).await {
                        debug!(session = %handle.id(), error = %e, "failed to send exit");
                    }
                }
                None => debug!(session = %handle.id(), ?status, "exit status not observed"),
            }
        }
        _ => {}
    }

    let _ = sink.close().await;
    termination
}

/// Pass PTY output through unchanged, writing `script` to the shell right
/// after the first chunk.
///
/// The input sender is dropped once the script is written, so the relay
/// never keeps the PTY writer alive on its own.
pub(crate) async fn relay_with_script(
    mut raw: mpsc::Receiver<Vec<u8>>,
    output: mpsc::Sender<Vec<u8>>,
    input: mpsc::Sender<Vec<u8>>,
    script: &'static str,
) {
    let mut input = Some(input);
    while let Some(chunk) = raw.recv().await {
        if output.send(chunk).await.is_err() {
            break;
        }
        if let Some(input) = input.take() {
            trace!("injecting shell integration");
            if input.send(script.as_bytes().to_vec()).await.is_err() {
                debug!("PTY writer closed before shell integration");
            }
        }
    }
}

/// Client to shell: apply input and resize frames until the client goes
/// away or the session is cancelled.
///
/// Malformed and server-only frames are dropped; they never end the session.
pub async fn pump_input<St, E>(
    mut stream: St,
    input: mpsc::Sender<Vec<u8>>,
    pty: Arc<SharedPty>,
    handle: Arc<SessionHandle>,
) -> Termination
where
    St: Stream<Item = std::result::Result<WsMessage, E>> + Unpin,
    E: fmt::Display,
{
    let cancel = handle.cancel_token().clone();

    let termination = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Termination::Cancelled,
            frame = stream.next() => frame,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break Termination::SocketError(e.to_string()),
            None => break Termination::ClientClosed,
        };

        match classify(&frame) {
            ClientFrame::Input(bytes) => {
                if bytes.is_empty() {
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Termination::Cancelled,
                    sent = input.send(bytes) => {
                        if sent.is_err() {
                            break Termination::PtyError("PTY writer closed".into());
                        }
                    }
                }
            }
            ClientFrame::Resize(size) => match apply_resize(&pty, size).await {
                Ok(()) => {
                    handle.set_size(size);
                    debug!(session = %handle.id(), cols = size.cols, rows = size.rows, "resized");
                }
                Err(e) => break Termination::PtyError(e.to_string()),
            },
            ClientFrame::Ignored(reason) => {
                debug!(session = %handle.id(), reason, "dropping client frame");
            }
            ClientFrame::Closed => break Termination::ClientClosed,
        }
    };

    handle.begin_close();
    termination
}
