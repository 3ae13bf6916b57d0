//! Background exit monitoring.
//!
//! A detached container is watched by an [`ExitMonitor`]: a thread that
//! blocks until the container process exits and then runs its cleanup.
//! The thread's handle is the completion signal. A monitor cannot be
//! cancelled once spawned, only observed.

use std::sync::{Arc, Once};
use std::thread::JoinHandle;

use corral_common::error::{CorralError, Result};

use crate::launcher::ContainerProcess;

/// Cleanup that runs at most once, however many exit paths reach it.
#[derive(Clone)]
pub struct ExitCleanup {
    once: Arc<Once>,
    action: Arc<dyn Fn() + Send + Sync>,
}

impl std::fmt::Debug for ExitCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitCleanup")
            .field("done", &self.once.is_completed())
            .finish_non_exhaustive()
    }
}

impl ExitCleanup {
    /// Wraps `action`.
    pub fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            once: Arc::new(Once::new()),
            action: Arc::new(action),
        }
    }

    /// Runs the action unless some clone already ran it.
    pub fn run(&self) {
        self.once.call_once(|| (self.action)());
    }

    /// Whether the action has completed.
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.once.is_completed()
    }
}

/// Watches one container process.
#[derive(Debug)]
pub struct ExitMonitor {
    pid: u32,
    handle: JoinHandle<Result<i32>>,
}

impl ExitMonitor {
    /// Starts watching `process`; `cleanup` runs after it exits, whether
    /// or not waiting succeeded.
    ///
    /// # Errors
    ///
    /// Returns a process error if the thread cannot be started.
    pub fn spawn(mut process: Box<dyn ContainerProcess>, cleanup: ExitCleanup) -> Result<Self> {
        let pid = process.pid();
        let handle = std::thread::Builder::new()
            .name(format!("exit-monitor-{pid}"))
            .spawn(move || {
                let code = process.wait();
                match &code {
                    Ok(code) => tracing::info!(pid, code, "container process exited"),
                    Err(e) => tracing::warn!(pid, error = %e, "lost track of container process"),
                }
                cleanup.run();
                code
            })
            .map_err(|e| CorralError::process(format!("start exit monitor: {e}")))?;
        Ok(Self { pid, handle })
    }

    /// Pid being watched.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the process exited and cleanup finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until cleanup finished; returns the exit code.
    ///
    /// # Errors
    ///
    /// Returns the wait error, or a process error if the monitor thread
    /// panicked.
    pub fn wait(self) -> Result<i32> {
        self.handle
            .join()
            .map_err(|_| CorralError::process(format!("exit monitor for pid {} panicked", self.pid)))?
    }
}

#[cfg(test)]
mod tests {
    use std::process::{Child, Command};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct ChildProcess(Child);

    impl ContainerProcess for ChildProcess {
        fn pid(&self) -> u32 {
            self.0.id()
        }

        fn wait(&mut self) -> Result<i32> {
            let status = self.0.wait().map_err(|e| CorralError::process(e.to_string()))?;
            Ok(status.code().unwrap_or(-1))
        }

        fn kill(&mut self) {
            let _ = self.0.kill();
        }
    }

    fn counting() -> (ExitCleanup, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let cleanup = ExitCleanup::new(move || {
            let _ = seen.fetch_add(1, Ordering::SeqCst);
        });
        (cleanup, count)
    }

    #[test]
    fn cleanup_runs_after_exit() {
        let child = Command::new("sh").args(["-c", "exit 7"]).spawn().expect("spawn");
        let (cleanup, count) = counting();
        let monitor = ExitMonitor::spawn(Box::new(ChildProcess(child)), cleanup.clone()).expect("spawn");

        assert_eq!(monitor.wait().expect("wait"), 7);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(cleanup.has_run());
    }

    #[test]
    fn cleanup_runs_exactly_once() {
        let child = Command::new("true").spawn().expect("spawn");
        let (cleanup, count) = counting();
        let monitor = ExitMonitor::spawn(Box::new(ChildProcess(child)), cleanup.clone()).expect("spawn");
        cleanup.run();
        let _ = monitor.wait().expect("wait");
        cleanup.run();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn monitor_reports_running_until_exit() {
        let child = Command::new("sleep").arg("0.3").spawn().expect("spawn");
        let (cleanup, _) = counting();
        let monitor = ExitMonitor::spawn(Box::new(ChildProcess(child)), cleanup).expect("spawn");
        assert!(!monitor.is_finished());
        let _ = monitor.wait().expect("wait");
    }
}
