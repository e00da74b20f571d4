//! One terminal session: a WebSocket bound to a shell on a PTY.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::forward::{self, ClientFrame, OutputTiming};
use super::{SessionHandle, SessionId, SessionRegistry, SessionState};
use crate::error::PtyServerError;
use crate::protocol::{self, Message, SPAWN_FAILURE_EXIT_CODE};
use crate::pty::{
    AsyncPtyReader, AsyncPtyWriter, ChildStatus, NativePty, PtySize, SharedPty, SpawnEnv,
    SpawnedPty, DEFAULT_BUFFER_SIZE,
};
use crate::shell::{integration_script_for, ShellChoice, ShellResolver};
use crate::Result;

/// Capacity of the channels between the PTY threads and the pumps.
const CHANNEL_CAPACITY: usize = 64;

/// How long to wait for a shell that ignored the hangup to die after SIGKILL.
const FORCE_KILL_WAIT: Duration = Duration::from_millis(500);

/// Per-session settings, shared by every session of a server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Window size the shell starts with.
    pub initial_size: PtySize,
    /// Environment given to the shell.
    pub spawn_env: SpawnEnv,
    /// Which shell to run; resolved per session.
    pub shell: ShellChoice,
    /// Inject working-directory reporting into bash, zsh and fish.
    pub shell_integration: bool,
    /// PTY read buffer size.
    pub read_buffer_size: usize,
    /// Output drain bounds.
    pub timing: OutputTiming,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_size: PtySize::default(),
            spawn_env: SpawnEnv::default(),
            shell: ShellChoice::Auto,
            shell_integration: true,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            timing: OutputTiming::default(),
        }
    }
}

/// Client requests received while the shell was still starting.
#[derive(Debug, Default)]
struct Pending {
    resize: Option<PtySize>,
    input: Vec<u8>,
}

/// Result of the `Starting` phase.
struct Started {
    spawn: Result<SpawnedPty>,
    /// Script to write once the shell has produced output.
    integration: Option<&'static str>,
    pending: Pending,
    /// The client left (or close was requested) before the shell was ready.
    aborted: bool,
}

/// A live session.
///
/// Created when a WebSocket upgrade is accepted and registered immediately.
/// [`run`](Self::run) drives it to completion; cleanup is idempotent and
/// also runs on drop.
pub struct Session {
    handle: Arc<SessionHandle>,
    registry: Arc<SessionRegistry>,
    config: Arc<SessionConfig>,
    pty: Option<Arc<SharedPty>>,
    exit: Option<watch::Receiver<ChildStatus>>,
}

impl Session {
    /// Allocate an id and register a new session in `Starting`.
    pub fn create(registry: Arc<SessionRegistry>, config: Arc<SessionConfig>) -> Result<Self> {
        let handle = Arc::new(SessionHandle::new(SessionId::next(), config.initial_size));
        registry.insert(Arc::clone(&handle))?;
        debug!(session = %handle.id(), "session registered");
        Ok(Self {
            handle,
            registry,
            config,
            pty: None,
            exit: None,
        })
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    /// Serve the session over an upgraded WebSocket until it terminates.
    pub async fn run(self, socket: WebSocket) {
        let (sink, stream) = socket.split();
        self.run_split(sink, stream).await;
    }

    /// Serve the session over separate sink and stream halves.
    pub async fn run_split<Si, St, E>(mut self, mut sink: Si, mut stream: St)
    where
        Si: Sink<WsMessage> + Unpin + Send + 'static,
        Si::Error: fmt::Display,
        St: Stream<Item = std::result::Result<WsMessage, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        info!(session = %self.id(), "session starting");

        let started = self.start(&mut stream).await;
        match started.spawn {
            Ok(spawned) if started.aborted => {
                debug!(session = %self.id(), "client left before shell was ready");
                // Dropping the I/O halves is fine; cleanup only needs the handle.
                let _ = self.adopt(spawned);
            }
            Ok(spawned) => {
                self.forward(spawned, started.pending, started.integration, sink, stream)
                    .await
            }
            Err(e) => {
                warn!(session = %self.id(), error = %e, "failed to start shell");
                self.handle.begin_close();
                if !started.aborted {
                    let exit = protocol::encode(&Message::exit(SPAWN_FAILURE_EXIT_CODE));
                    let _ = sink.send(WsMessage::Text(exit.into())).await;
                    let _ = sink.close().await;
                }
            }
        }

        self.cleanup().await;
    }

    /// Resolve and spawn the shell on a blocking thread, buffering client
    /// requests that arrive meanwhile.
    async fn start<St, E>(&self, stream: &mut St) -> Started
    where
        St: Stream<Item = std::result::Result<WsMessage, E>> + Unpin,
        E: fmt::Display,
    {
        let config = Arc::clone(&self.config);
        let mut spawn = tokio::task::spawn_blocking(move || {
            let shell = ShellResolver::from_env().resolve_choice(&config.shell)?;
            debug!(shell = %shell.path.display(), "spawning shell");
            let integration = if config.shell_integration {
                integration_script_for(&shell.path)
            } else {
                None
            };
            NativePty::new()
                .spawn(&shell, config.initial_size, &config.spawn_env)
                .map(|spawned| (spawned, integration))
        });

        let cancel = self.handle.cancel_token().clone();
        let mut pending = Pending::default();
        let mut aborted = false;

        loop {
            tokio::select! {
                joined = &mut spawn => {
                    let (spawn, integration) = match joined {
                        Ok(Ok((spawned, integration))) => (Ok(spawned), integration),
                        Ok(Err(e)) => (Err(e), None),
                        Err(e) => (
                            Err(PtyServerError::Spawn(format!("spawn task failed: {}", e))),
                            None,
                        ),
                    };
                    return Started { spawn, integration, pending, aborted };
                }
                _ = cancel.cancelled(), if !aborted => aborted = true,
                frame = stream.next(), if !aborted => match frame {
                    Some(Ok(frame)) => match forward::classify(&frame) {
                        ClientFrame::Input(bytes) => pending.input.extend_from_slice(&bytes),
                        // Latest wins.
                        ClientFrame::Resize(size) => pending.resize = Some(size),
                        ClientFrame::Ignored(reason) => {
                            debug!(session = %self.id(), reason, "dropping client frame");
                        }
                        ClientFrame::Closed => aborted = true,
                    },
                    Some(Err(e)) => {
                        debug!(session = %self.id(), error = %e, "socket error while starting");
                        aborted = true;
                    }
                    None => aborted = true,
                },
            }
        }
    }

    /// Take ownership of a spawned shell so cleanup can reap it.
    fn adopt(&mut self, spawned: SpawnedPty) -> (Arc<SharedPty>, SpawnedParts) {
        let SpawnedPty {
            pty,
            reader,
            writer,
            child,
        } = spawned;
        let pty = Arc::new(pty);
        let exit = pty.watch_exit(child);
        self.pty = Some(Arc::clone(&pty));
        self.exit = Some(exit.clone());
        (pty, SpawnedParts { reader, writer, exit })
    }

    /// Run both forwarding directions until the session terminates.
    async fn forward<Si, St, E>(
        &mut self,
        spawned: SpawnedPty,
        pending: Pending,
        integration: Option<&'static str>,
        sink: Si,
        stream: St,
    ) where
        Si: Sink<WsMessage> + Unpin + Send + 'static,
        Si::Error: fmt::Display,
        St: Stream<Item = std::result::Result<WsMessage, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let id = self.id();
        let (pty, parts) = self.adopt(spawned);

        let (output_tx, mut output_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(
            AsyncPtyReader::new(parts.reader, output_tx)
                .with_buffer_size(self.config.read_buffer_size)
                .run(),
        );
        tokio::spawn(AsyncPtyWriter::new(parts.writer, input_rx).run());

        if let Some(script) = integration {
            debug!(session = %id, "shell integration enabled");
            let (relayed_tx, relayed_rx) = mpsc::channel(CHANNEL_CAPACITY);
            tokio::spawn(forward::relay_with_script(
                output_rx,
                relayed_tx,
                input_tx.clone(),
                script,
            ));
            output_rx = relayed_rx;
        }

        if let Some(size) = pending.resize {
            match forward::apply_resize(&pty, size).await {
                Ok(()) => self.handle.set_size(size),
                Err(e) => warn!(session = %id, error = %e, "failed to apply buffered resize"),
            }
        }
        if !pending.input.is_empty() && input_tx.send(pending.input).await.is_err() {
            warn!(session = %id, "failed to write buffered input");
        }

        if let Err(e) = self.handle.transition(SessionState::Running) {
            // A close request raced the spawn; cleanup takes it from here.
            debug!(session = %id, error = %e, "session not entering running");
            return;
        }
        info!(session = %id, pid = ?pty.pid(), "shell attached");

        let output = tokio::spawn(forward::pump_output(
            sink,
            output_rx,
            parts.exit,
            Arc::clone(&self.handle),
            self.config.timing,
        ));
        let input = tokio::spawn(forward::pump_input(
            stream,
            input_tx,
            Arc::clone(&pty),
            Arc::clone(&self.handle),
        ));

        let (output, input) = tokio::join!(output, input);
        match (output, input) {
            (Ok(out), Ok(inp)) => {
                debug!(session = %id, output = %out, input = %inp, "forwarding stopped");
            }
            (out, inp) => {
                warn!(session = %id, output = ?out.err(), input = ?inp.err(), "forwarding task failed");
            }
        }
    }

    /// Tear the session down: kill and reap the shell, release the PTY,
    /// and leave the registry. Safe to call more than once.
    async fn cleanup(&mut self) {
        if self.handle.state().is_terminal() {
            return;
        }
        self.handle.begin_close();

        if let Some(pty) = self.pty.take() {
            let mut exit = self.exit.take();
            let killer = Arc::clone(&pty);
            let _ = tokio::task::spawn_blocking(move || killer.kill()).await;

            let wait = self.config.timing.exit_wait;
            if !reaped(exit.as_mut(), wait).await && pty.force_kill() {
                reaped(exit.as_mut(), FORCE_KILL_WAIT).await;
            }
            pty.release();
        }

        self.finish();
    }

    /// Final synchronous step shared with `Drop`.
    fn finish(&mut self) {
        if let Some(pty) = self.pty.take() {
            pty.kill();
            pty.release();
        }
        self.exit = None;

        if !self.handle.state().is_terminal() {
            self.handle.begin_close();
            if let Err(e) = self.handle.transition(SessionState::Closed) {
                warn!(session = %self.id(), error = %e, "unexpected state during cleanup");
            }
        }
        match self.registry.remove(&self.id()) {
            Ok(Some(handle)) => {
                info!(session = %self.id(), age_ms = handle.age().as_millis() as u64, "session closed");
            }
            Ok(None) => {}
            Err(e) => warn!(session = %self.id(), error = %e, "failed to unregister session"),
        }
    }
}

/// The pieces of a spawned shell the forwarding tasks take over.
struct SpawnedParts {
    reader: Box<dyn std::io::Read + Send>,
    writer: Box<dyn std::io::Write + Send>,
    exit: watch::Receiver<ChildStatus>,
}

/// Wait up to `bound` for the shell to be reaped.
async fn reaped(exit: Option<&mut watch::Receiver<ChildStatus>>, bound: Duration) -> bool {
    let Some(exit) = exit else {
        return true;
    };
    let observed = async { exit.wait_for(|s| !s.is_running()).await.map(|s| *s) };
    matches!(tokio::time::timeout(bound, observed).await, Ok(Ok(_)))
}

impl Drop for Session {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("pty", &self.pty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ResolvedShell;
    use futures_util::stream;
    use std::path::PathBuf;
    use tokio_util::sync::PollSender;

    fn config_with(shell: ResolvedShell) -> Arc<SessionConfig> {
        Arc::new(SessionConfig {
            shell: ShellChoice::Exact(shell),
            timing: OutputTiming {
                flush_grace: Duration::from_millis(50),
                exit_wait: Duration::from_secs(2),
            },
            ..SessionConfig::default()
        })
    }

    fn sh(script: &str) -> ResolvedShell {
        ResolvedShell {
            path: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
        }
    }

    async fn collect(mut rx: mpsc::Receiver<WsMessage>) -> Vec<Message> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            if let WsMessage::Text(t) = frame {
                frames.push(protocol::decode(t.as_str()).unwrap());
            }
        }
        frames
    }

    #[test]
    fn test_create_registers() {
        let registry = Arc::new(SessionRegistry::new());
        let session = Session::create(Arc::clone(&registry), Arc::new(SessionConfig::default()))
            .unwrap();

        assert!(registry.contains(&session.id()).unwrap());
        assert_eq!(session.state(), SessionState::Starting);

        let id = session.id();
        drop(session);
        assert!(!registry.contains(&id).unwrap());
    }

    #[test]
    fn test_create_after_close_fails() {
        let registry = Arc::new(SessionRegistry::new());
        registry.close_all();
        let result = Session::create(registry, Arc::new(SessionConfig::default()));
        assert!(matches!(result, Err(PtyServerError::RegistryClosed)));
    }

    #[tokio::test]
    async fn test_spawn_failure_sends_exit_minus_one() {
        let registry = Arc::new(SessionRegistry::new());
        let config = config_with(ResolvedShell {
            path: PathBuf::from("/definitely/not/a/shell"),
            args: Vec::new(),
        });
        let session = Session::create(Arc::clone(&registry), config).unwrap();
        let handle = Arc::clone(session.handle());

        let (frame_tx, frame_rx) = mpsc::channel(8);
        let stream = stream::pending::<std::result::Result<WsMessage, std::io::Error>>();
        tokio::time::timeout(
            Duration::from_secs(5),
            session.run_split(PollSender::new(frame_tx), stream),
        )
        .await
        .unwrap();

        assert_eq!(collect(frame_rx).await, vec![Message::exit(-1)]);
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(registry.count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_exit_code_reported() {
        let registry = Arc::new(SessionRegistry::new());
        let session =
            Session::create(Arc::clone(&registry), config_with(sh("printf done; exit 3"))).unwrap();

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let stream = stream::pending::<std::result::Result<WsMessage, std::io::Error>>();
        tokio::time::timeout(
            Duration::from_secs(10),
            session.run_split(PollSender::new(frame_tx), stream),
        )
        .await
        .unwrap();

        let frames = collect(frame_rx).await;
        assert_eq!(frames.last(), Some(&Message::exit(3)));
        assert_eq!(frames.iter().filter(|m| m.kind() == "exit").count(), 1);
        let output: String = frames
            .iter()
            .filter_map(|m| match m {
                Message::Output { data } => Some(data.as_str()),
                _ => None,
            })
            .collect();
        assert!(output.contains("done"));
        assert_eq!(registry.count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_buffered_resize_and_input_applied() {
        let registry = Arc::new(SessionRegistry::new());
        let session = Session::create(
            Arc::clone(&registry),
            config_with(sh("read line; stty size; exit 0")),
        )
        .unwrap();

        // Sent before the shell is up; both must survive the Starting phase.
        let frames = vec![
            Ok::<_, std::io::Error>(WsMessage::Text(
                r#"{"type":"resize","cols":90,"rows":30}"#.into(),
            )),
            Ok(WsMessage::Text(
                r#"{"type":"resize","cols":100,"rows":40}"#.into(),
            )),
            Ok(WsMessage::Text(r#"{"type":"input","data":"go\n"}"#.into())),
        ];
        let stream = stream::iter(frames).chain(stream::pending());

        let (frame_tx, frame_rx) = mpsc::channel(64);
        tokio::time::timeout(
            Duration::from_secs(10),
            session.run_split(PollSender::new(frame_tx), stream),
        )
        .await
        .unwrap();

        let frames = collect(frame_rx).await;
        let output: String = frames
            .iter()
            .filter_map(|m| match m {
                Message::Output { data } => Some(data.as_str()),
                _ => None,
            })
            .collect();
        assert!(output.contains("40 100"), "unexpected output: {:?}", output);
        assert_eq!(frames.last(), Some(&Message::exit(0)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_client_close_reaps_shell() {
        let registry = Arc::new(SessionRegistry::new());
        let session = Session::create(Arc::clone(&registry), config_with(sh("sleep 30"))).unwrap();
        let handle = Arc::clone(session.handle());

        let (close_tx, close_rx) = mpsc::channel::<std::result::Result<WsMessage, std::io::Error>>(1);
        let stream = receiver_stream(close_rx);
        let (frame_tx, frame_rx) = mpsc::channel(64);

        let task = tokio::spawn(session.run_split(PollSender::new(frame_tx), stream));

        // Wait until the shell is attached, then hang up.
        for _ in 0..100 {
            if handle.state() == SessionState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(handle.state(), SessionState::Running);
        close_tx.send(Ok(WsMessage::Close(None))).await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();

        let frames = collect(frame_rx).await;
        assert!(frames.iter().all(|m| m.kind() != "exit"));
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(registry.count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_all_stops_running_session() {
        let registry = Arc::new(SessionRegistry::new());
        let session = Session::create(Arc::clone(&registry), config_with(sh("sleep 30"))).unwrap();
        let handle = Arc::clone(session.handle());

        let (frame_tx, _frame_rx) = mpsc::channel(64);
        let stream = stream::pending::<std::result::Result<WsMessage, std::io::Error>>();
        let task = tokio::spawn(session.run_split(PollSender::new(frame_tx), stream));

        for _ in 0..100 {
            if handle.state() == SessionState::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(registry.close_all(), 1);
        assert!(registry.wait_until_empty(Duration::from_secs(10)).await);
        task.await.unwrap();
        assert_eq!(handle.state(), SessionState::Closed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bash_reports_working_directory() {
        if ShellResolver::from_env().resolve_named("bash").is_err() {
            return;
        }
        let registry = Arc::new(SessionRegistry::new());
        let config = Arc::new(SessionConfig {
            shell: ShellChoice::Named {
                name: "bash".into(),
                args: vec!["--norc".into(), "--noprofile".into(), "-i".into()],
            },
            spawn_env: SpawnEnv {
                cwd: Some(PathBuf::from("/")),
                ..SpawnEnv::default()
            },
            ..SessionConfig::default()
        });
        let session = Session::create(Arc::clone(&registry), config).unwrap();

        let (client_tx, client_rx) =
            mpsc::channel::<std::result::Result<WsMessage, std::io::Error>>(4);
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        let task = tokio::spawn(
            session.run_split(PollSender::new(frame_tx), receiver_stream(client_rx)),
        );

        let mut output = String::new();
        let found = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(frame) = frame_rx.recv().await {
                if let WsMessage::Text(t) = frame {
                    if let Some(Message::Output { data }) = protocol::decode(t.as_str()) {
                        output.push_str(&data);
                        if output.contains("\u{1b}]7;file://") {
                            return true;
                        }
                    }
                }
            }
            false
        })
        .await;
        assert!(matches!(found, Ok(true)), "no cwd report in {:?}", output);

        client_tx.send(Ok(WsMessage::Close(None))).await.unwrap();
        drop(frame_rx);
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registry.count(), 0);
    }

    /// Adapt an mpsc receiver into a stream of frames.
    fn receiver_stream<T: Send + 'static>(
        rx: mpsc::Receiver<T>,
    ) -> impl Stream<Item = T> + Unpin + Send + 'static {
        Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }
}
