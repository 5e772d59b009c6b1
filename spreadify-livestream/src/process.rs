//! Supervised external processes
//!
//! Encoders and relay forwarders run as child processes. Each one gets a
//! waiter task that reaps it and publishes the exit status, so owners only
//! ever block on bounded waits. Dropping a [`SupervisedProcess`] kills the
//! child.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};

use spreadify_core::{Error, Result};

const STDERR_TAIL_LINES: usize = 20;

/// Upper bound on waiting for a killed process to be reaped
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Counts supervised processes that have been spawned and not yet reaped.
#[derive(Debug, Clone, Default)]
pub struct ProcessTracker {
    live: Arc<AtomicUsize>,
}

impl ProcessTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn register(&self) -> TrackerGuard {
        self.live.fetch_add(1, Ordering::SeqCst);
        TrackerGuard {
            live: Arc::clone(&self.live),
        }
    }
}

struct TrackerGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when terminated by a signal or the status was lost
    pub code: Option<i32>,
    pub success: bool,
}

impl ProcessExit {
    const fn unknown() -> Self {
        Self {
            code: None,
            success: false,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// A child process with graceful-then-forced shutdown.
pub struct SupervisedProcess {
    name: String,
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl SupervisedProcess {
    /// Spawn `program` with `args`. `name` identifies the process in logs.
    pub fn spawn(
        name: impl Into<String>,
        program: &str,
        args: &[String],
        tracker: &ProcessTracker,
    ) -> Result<Self> {
        let name = name.into();
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn {program} for {name}: {e}")))?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        // Keep stderr drained so the child never blocks on a full pipe
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&stderr_tail);
            let name = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!(process = %name, "{line}");
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);
        let guard = tracker.register();
        let waiter_name = name.clone();

        tokio::spawn(async move {
            // A dropped kill sender also resolves `kill_rx`
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let exit = match status {
                Ok(status) => ProcessExit {
                    code: status.code(),
                    success: status.success(),
                },
                Err(e) => {
                    warn!(process = %waiter_name, error = %e, "Failed to reap process");
                    ProcessExit::unknown()
                }
            };
            debug!(process = %waiter_name, exit = %exit, "Process exited");
            drop(guard);
            let _ = exit_tx.send(Some(exit));
        });

        debug!(process = %name, pid = ?pid, program = %program, "Process spawned");

        Ok(Self {
            name,
            pid,
            stdin: tokio::sync::Mutex::new(stdin),
            kill_tx: Mutex::new(Some(kill_tx)),
            exit_rx,
            stderr_tail,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, if the process has been reaped
    #[must_use]
    pub fn exit_status(&self) -> Option<ProcessExit> {
        self.exit_rx.borrow().clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.exit_status().is_none()
    }

    /// Wait until the process has exited
    pub async fn wait(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone(),
            Err(_) => None,
        };
        exit.unwrap_or_else(ProcessExit::unknown)
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Option<ProcessExit> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Last lines the process wrote to stderr
    #[must_use]
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().iter().cloned().collect()
    }

    /// Human-readable reason for an unexpected exit
    #[must_use]
    pub fn failure_reason(&self) -> String {
        let exit = self
            .exit_status()
            .map_or_else(|| "still running".to_string(), |e| e.to_string());
        match self.stderr_tail.lock().back() {
            Some(line) => format!("{exit}: {line}"),
            None => exit,
        }
    }

    /// Force-kill without waiting
    pub fn kill(&self) {
        if let Some(tx) = self.kill_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Ask the process to quit (`q` on stdin, then EOF), wait up to `grace`,
    /// then kill it. Safe to call repeatedly and concurrently.
    pub async fn stop(&self, grace: Duration) -> ProcessExit {
        if let Some(exit) = self.exit_status() {
            return exit;
        }

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.write_all(b"q\n").await;
            let _ = stdin.flush().await;
        }

        if let Some(exit) = self.wait_timeout(grace).await {
            debug!(process = %self.name, exit = %exit, "Process stopped gracefully");
            return exit;
        }

        warn!(
            process = %self.name,
            grace_ms = grace.as_millis() as u64,
            "Process ignored graceful stop, killing"
        );
        self.kill();
        self.wait_timeout(KILL_WAIT)
            .await
            .unwrap_or_else(ProcessExit::unknown)
    }
}

impl fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("exit", &self.exit_status())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_graceful_stop_via_stdin() {
        let tracker = ProcessTracker::new();
        let process =
            SupervisedProcess::spawn("reader", "sh", &sh("read _; exit 0"), &tracker).unwrap();
        assert!(process.is_running());
        assert_eq!(tracker.live(), 1);

        let exit = process.stop(Duration::from_secs(5)).await;
        assert!(exit.success);
        assert_eq!(tracker.live(), 0);

        // Idempotent
        assert_eq!(process.stop(Duration::from_secs(5)).await, exit);
    }

    #[tokio::test]
    async fn test_force_kill_after_grace() {
        let tracker = ProcessTracker::new();
        let process = SupervisedProcess::spawn(
            "stubborn",
            "sh",
            &sh("trap '' TERM; sleep 30"),
            &tracker,
        )
        .unwrap();

        let exit = process.stop(Duration::from_millis(200)).await;
        assert!(!exit.success);
        assert!(exit.code.is_none());
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn test_exit_reason_includes_stderr() {
        let tracker = ProcessTracker::new();
        let process =
            SupervisedProcess::spawn("failing", "sh", &sh("echo boom >&2; exit 3"), &tracker)
                .unwrap();

        let exit = process.wait().await;
        assert_eq!(exit.code, Some(3));

        for _ in 0..50 {
            if !process.stderr_tail().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(process.failure_reason(), "exit code 3: boom");
    }

    #[tokio::test]
    async fn test_concurrent_waiters_see_same_exit() {
        let tracker = ProcessTracker::new();
        let process =
            SupervisedProcess::spawn("short", "sh", &sh("sleep 0.2; exit 4"), &tracker).unwrap();

        let (first, second) = tokio::join!(process.wait(), process.wait());
        assert_eq!(first.code, Some(4));
        assert_eq!(first, second);
        // Already reaped
        assert_eq!(process.wait().await, first);
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let tracker = ProcessTracker::new();
        let err = SupervisedProcess::spawn("ghost", "/nonexistent/ffmpeg", &[], &tracker)
            .unwrap_err();
        assert!(matches!(err, Error::Process(_)));
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn test_drop_kills_child() {
        let tracker = ProcessTracker::new();
        let process =
            SupervisedProcess::spawn("dropped", "sh", &sh("sleep 30"), &tracker).unwrap();
        drop(process);

        for _ in 0..100 {
            if tracker.live() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(tracker.live(), 0);
    }
}
