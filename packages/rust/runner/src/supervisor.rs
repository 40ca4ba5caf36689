//! Process supervisor: runs one worker with an inactivity timeout.
//!
//! Output from the child's stdout and stderr is pumped into a channel by two
//! reader tasks. A monitor task wakes on a fixed interval, appends whatever
//! arrived to the log, and kills the child once no output has been seen for a
//! full timeout window.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use docbuilder_shared::{DocBuilderError, Result};

const READ_CHUNK: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// Log destination
// ---------------------------------------------------------------------------

/// Where captured worker output goes.
pub enum LogSink {
    /// A file the supervisor creates and owns (closed on exit).
    File(PathBuf),
    /// The orchestrator's own standard output.
    Stdout,
    /// A caller-supplied stream. Flushed, never closed by the supervisor.
    Writer(Box<dyn Write + Send>),
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Stdout => f.write_str("Stdout"),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl LogSink {
    /// Open the destination. A file that cannot be created degrades to stdout.
    fn open(self) -> Box<dyn Write + Send> {
        match self {
            Self::File(path) => match File::create(&path) {
                Ok(file) => Box::new(BufWriter::new(file)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot open log file, logging to stdout");
                    Box::new(io::stdout())
                }
            },
            Self::Stdout => Box::new(io::stdout()),
            Self::Writer(w) => w,
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Sending half of a batch-wide cancellation flag.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

/// Receiving half; cheap to clone into every job.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

/// Create a connected cancellation pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once cancellation is requested. Pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Supervised process
// ---------------------------------------------------------------------------

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The process terminated on its own.
    Exited(ExitStatus),
    /// Killed after producing no output for a full timeout window.
    TimedOut,
    /// Killed because the batch was cancelled.
    Cancelled,
}

impl Completion {
    /// Whether the process exited on its own with a zero status.
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }
}

/// A running worker and its completion signal.
#[derive(Debug)]
pub struct SupervisedProcess {
    pub pid: Option<u32>,
    completion: JoinHandle<Result<Completion>>,
}

impl SupervisedProcess {
    /// Whether the monitor has finished (the child is reaped).
    pub fn is_finished(&self) -> bool {
        self.completion.is_finished()
    }

    /// Wait for the monitor to finish.
    pub async fn wait(self) -> Result<Completion> {
        self.completion
            .await
            .map_err(|e| DocBuilderError::Process(format!("monitor task failed: {e}")))?
    }
}

/// Which processes a kill reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillScope {
    /// The child leads a new process group and the whole group is killed, so
    /// nothing it started survives it. Unix only; elsewhere same as `Child`.
    Group,
    /// Only the child. It stays in the caller's process group, so a kill of
    /// the caller's group still reaches it.
    Child,
}

/// Spawn `command` in its own process group and supervise it.
///
/// The child is killed if it produces no output for longer than `timeout`,
/// checked every `poll`, or when `cancel` fires. The log is flushed on every
/// exit path. Must be called from within a tokio runtime.
pub fn run_with_timeout(
    command: Command,
    log: LogSink,
    timeout: Duration,
    poll: Duration,
    cancel: CancelSignal,
) -> Result<SupervisedProcess> {
    spawn_supervised(command, log, timeout, poll, cancel, KillScope::Group)
}

/// [`run_with_timeout`] with an explicit [`KillScope`].
#[instrument(skip_all, fields(program = ?command.as_std().get_program(), timeout_secs = timeout.as_secs(), ?scope))]
pub fn spawn_supervised(
    mut command: Command,
    log: LogSink,
    timeout: Duration,
    poll: Duration,
    cancel: CancelSignal,
    scope: KillScope,
) -> Result<SupervisedProcess> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if scope == KillScope::Group {
        lead_new_group(&mut command);
    }
    let mut child = command
        .spawn()
        .map_err(|e| DocBuilderError::Process(format!("failed to spawn worker: {e}")))?;

    let pid = child.id();
    info!(pid, "worker started");

    let (tx, rx) = mpsc::unbounded_channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pump(stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pump(stderr, tx)));
    }

    let monitor = Monitor {
        child,
        group: match scope {
            KillScope::Group => pid,
            KillScope::Child => None,
        },
        output: rx,
        readers,
        log: log.open(),
        timeout,
        poll,
        cancel,
    };
    let completion = tokio::spawn(monitor.run());

    Ok(SupervisedProcess { pid, completion })
}

#[cfg(unix)]
fn lead_new_group(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn lead_new_group(_command: &mut Command) {}

/// Copy a child stream into the output channel until EOF.
async fn pump<R: AsyncRead + Unpin>(mut stream: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "worker stream closed");
                break;
            }
        }
    }
}

struct Monitor {
    child: Child,
    /// Process group led by the child, when it has one.
    group: Option<u32>,
    output: mpsc::UnboundedReceiver<Vec<u8>>,
    readers: Vec<JoinHandle<()>>,
    log: Box<dyn Write + Send>,
    timeout: Duration,
    poll: Duration,
    cancel: CancelSignal,
}

impl Monitor {
    async fn run(mut self) -> Result<Completion> {
        let result = self.watch().await;
        if let Err(e) = self.log.flush() {
            warn!(error = %e, "failed to flush worker log");
        }
        // Dropping `self` closes an owned log file and kills a child that is
        // somehow still alive.
        result
    }

    async fn watch(&mut self) -> Result<Completion> {
        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_output = Instant::now();
        let mut cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => {
                    warn!("batch cancelled, killing worker");
                    self.kill().await?;
                    self.finish_readers().await;
                    self.drain()?;
                    return Ok(Completion::Cancelled);
                }
            }

            if self.drain()? {
                last_output = Instant::now();
            }

            match self.child.try_wait() {
                Ok(Some(status)) => {
                    // Background processes the worker left behind.
                    self.kill_group();
                    self.finish_readers().await;
                    self.drain()?;
                    info!(%status, "worker exited");
                    return Ok(Completion::Exited(status));
                }
                Ok(None) => {}
                Err(e) => return Err(DocBuilderError::Process(format!("failed to poll worker: {e}"))),
            }

            let idle = last_output.elapsed();
            if idle > self.timeout {
                warn!(idle_secs = idle.as_secs(), "worker produced no output, killing");
                self.kill().await?;
                self.finish_readers().await;
                self.drain()?;
                return Ok(Completion::TimedOut);
            }
        }
    }

    /// Append everything buffered so far to the log. Returns whether anything
    /// was written.
    fn drain(&mut self) -> Result<bool> {
        let mut wrote = false;
        while let Ok(chunk) = self.output.try_recv() {
            self.log
                .write_all(&chunk)
                .map_err(|e| DocBuilderError::Process(format!("failed to write worker log: {e}")))?;
            wrote = true;
        }
        Ok(wrote)
    }

    /// Let the readers hit EOF after exit. Bounded, since a grandchild may
    /// still hold the pipes open.
    async fn finish_readers(&mut self) {
        for reader in self.readers.drain(..) {
            if tokio::time::timeout(self.poll, reader).await.is_err() {
                debug!("worker pipe still open after exit");
            }
        }
    }

    /// Kill the child's process group (if any) and the child, then reap it.
    async fn kill(&mut self) -> Result<()> {
        self.kill_group();
        self.child
            .kill()
            .await
            .map_err(|e| DocBuilderError::Process(format!("failed to kill worker: {e}")))
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        let Some(pgid) = self.group.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
            return;
        };
        // SAFETY: killpg takes no pointers; an already empty group yields ESRCH.
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
            debug!(pgid, error = %io::Error::last_os_error(), "process group already gone");
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Shared in-memory log for assertions.
    #[derive(Clone, Default)]
    struct SharedLog(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedLog {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("lock")).into_owned()
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    const POLL: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn captures_output_of_normal_exit() {
        let log = SharedLog::default();
        let worker = run_with_timeout(
            sh("echo out; echo err >&2"),
            LogSink::Writer(Box::new(log.clone())),
            Duration::from_secs(5),
            POLL,
            CancelSignal::never(),
        )
        .expect("spawn");
        assert!(worker.pid.is_some());

        let completion = worker.wait().await.expect("wait");
        assert!(completion.success());
        let text = log.contents();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    #[tokio::test]
    async fn reports_failing_exit_status() {
        let worker = run_with_timeout(
            sh("exit 3"),
            LogSink::Writer(Box::new(SharedLog::default())),
            Duration::from_secs(5),
            POLL,
            CancelSignal::never(),
        )
        .expect("spawn");
        match worker.wait().await.expect("wait") {
            Completion::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected completion {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_worker_is_killed_near_deadline() {
        let timeout = Duration::from_millis(300);
        let start = std::time::Instant::now();
        let worker = run_with_timeout(
            sh("sleep 10"),
            LogSink::Writer(Box::new(SharedLog::default())),
            timeout,
            POLL,
            CancelSignal::never(),
        )
        .expect("spawn");

        assert_eq!(worker.wait().await.expect("wait"), Completion::TimedOut);
        let elapsed = start.elapsed();
        assert!(elapsed >= timeout);
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn steady_output_resets_inactivity_clock() {
        let log = SharedLog::default();
        // Runs well past the timeout but never goes quiet for a full window.
        let worker = run_with_timeout(
            sh("for i in 1 2 3 4 5 6 7 8; do echo tick $i; sleep 0.1; done"),
            LogSink::Writer(Box::new(log.clone())),
            Duration::from_millis(400),
            POLL,
            CancelSignal::never(),
        )
        .expect("spawn");

        assert!(worker.wait().await.expect("wait").success());
        assert!(log.contents().contains("tick 8"));
    }

    #[tokio::test]
    async fn cancellation_kills_worker() {
        let (handle, signal) = cancel_pair();
        let worker = run_with_timeout(
            sh("sleep 10"),
            LogSink::Writer(Box::new(SharedLog::default())),
            Duration::from_secs(30),
            POLL,
            signal,
        )
        .expect("spawn");

        handle.cancel();
        let completion = tokio::time::timeout(Duration::from_secs(5), worker.wait())
            .await
            .expect("monitor finished")
            .expect("wait");
        assert_eq!(completion, Completion::Cancelled);
    }

    #[tokio::test]
    async fn writes_owned_log_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("Example 1.0.0.log");
        let worker = run_with_timeout(
            sh("echo building"),
            LogSink::File(path.clone()),
            Duration::from_secs(5),
            POLL,
            CancelSignal::never(),
        )
        .expect("spawn");
        worker.wait().await.expect("wait");

        let text = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(text.trim(), "building");
    }

    #[tokio::test]
    async fn unopenable_log_degrades_to_stdout() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("missing").join("x.log");
        let worker = run_with_timeout(
            sh("true"),
            LogSink::File(path.clone()),
            Duration::from_secs(5),
            POLL,
            CancelSignal::never(),
        )
        .expect("spawn");
        assert!(worker.wait().await.expect("wait").success());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn timeout_kills_what_the_worker_started() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut cmd = sh("(sleep 1; touch alive) & wait");
        cmd.current_dir(tmp.path());
        let worker = run_with_timeout(
            cmd,
            LogSink::Writer(Box::new(SharedLog::default())),
            Duration::from_millis(300),
            POLL,
            CancelSignal::never(),
        )
        .expect("spawn");

        assert_eq!(worker.wait().await.expect("wait"), Completion::TimedOut);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!tmp.path().join("alive").exists());
    }

    #[tokio::test]
    async fn background_leftovers_die_with_the_worker() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut cmd = sh("(sleep 1; touch alive) & echo started");
        cmd.current_dir(tmp.path());
        let worker = run_with_timeout(
            cmd,
            LogSink::Writer(Box::new(SharedLog::default())),
            Duration::from_secs(5),
            POLL,
            CancelSignal::never(),
        )
        .expect("spawn");

        assert!(worker.wait().await.expect("wait").success());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!tmp.path().join("alive").exists());
    }

    #[tokio::test]
    async fn timed_out_worker_keeps_partial_log() {
        let log = SharedLog::default();
        let worker = run_with_timeout(
            sh("echo step one; echo step two >&2; sleep 10"),
            LogSink::Writer(Box::new(log.clone())),
            Duration::from_millis(300),
            POLL,
            CancelSignal::never(),
        )
        .expect("spawn");

        assert_eq!(worker.wait().await.expect("wait"), Completion::TimedOut);
        let text = log.contents();
        assert!(text.contains("step one"));
        assert!(text.contains("step two"));
    }

    #[tokio::test]
    async fn child_scope_leaves_caller_group_alone() {
        let worker = spawn_supervised(
            sh("sleep 10"),
            LogSink::Writer(Box::new(SharedLog::default())),
            Duration::from_millis(200),
            POLL,
            CancelSignal::never(),
            KillScope::Child,
        )
        .expect("spawn");
        assert_eq!(worker.wait().await.expect("wait"), Completion::TimedOut);
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let _guard = rt.enter();
        let err = run_with_timeout(
            Command::new("/nonexistent/docbuilder-worker"),
            LogSink::Stdout,
            Duration::from_secs(1),
            POLL,
            CancelSignal::never(),
        )
        .unwrap_err();
        assert!(matches!(err, DocBuilderError::Process(_)));
    }
}
