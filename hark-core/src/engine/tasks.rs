//! Background listening threads.
//!
//! Each task runs on a named OS thread and reports its result over a
//! one-slot exit channel. Joining waits on that channel with a timeout so a
//! loop stuck in a blocking read can never hang the caller; such a task is
//! marked [`TaskOutcome::Detached`] and left to finish on its own. Its real
//! outcome is still picked up by later polls once the thread exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Emits every utterance until stopped or the stream ends.
    Continuous,
    /// Emits one utterance, then exits.
    SingleShot,
}

impl TaskKind {
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::Continuous => "continuous",
            TaskKind::SingleShot => "single-shot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Running,
    Completed,
    /// The loop returned an error, or the thread panicked.
    Failed(String),
    /// Did not finish within the join timeout and may still be running.
    Detached,
}

impl TaskOutcome {
    /// Whether the thread has exited.
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskOutcome::Completed | TaskOutcome::Failed(_))
    }
}

pub(crate) struct BackgroundTask {
    kind: TaskKind,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    exit_rx: Receiver<Result<()>>,
    outcome: TaskOutcome,
}

impl BackgroundTask {
    /// Spawn `body` on a new thread. `cancel` is the task's running flag:
    /// storing `false` asks the loop to exit after its current frame.
    pub fn spawn<F>(kind: TaskKind, cancel: Arc<AtomicBool>, body: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name(format!("hark-listen-{}", kind.label()))
            .spawn(move || {
                let result = body();
                let _ = exit_tx.send(result);
            })?;
        debug!(kind = kind.label(), "listening task spawned");

        Ok(Self {
            kind,
            cancel,
            handle: Some(handle),
            exit_rx,
            outcome: TaskOutcome::Running,
        })
    }

    pub fn cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// Outcome without blocking.
    pub fn poll(&mut self) -> TaskOutcome {
        if !self.outcome.is_finished() {
            match self.exit_rx.try_recv() {
                Ok(result) => self.finish(result),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.panicked(),
            }
        }
        self.outcome.clone()
    }

    /// Wait at most `timeout` for the thread to exit.
    pub fn join_timeout(&mut self, timeout: Duration) -> TaskOutcome {
        if !self.outcome.is_finished() {
            match self.exit_rx.recv_timeout(timeout) {
                Ok(result) => self.finish(result),
                Err(RecvTimeoutError::Disconnected) => self.panicked(),
                Err(RecvTimeoutError::Timeout) if self.outcome == TaskOutcome::Detached => {}
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        kind = self.kind.label(),
                        timeout_ms = timeout.as_millis() as u64,
                        "listening task did not exit in time, detaching"
                    );
                    self.handle = None;
                    self.outcome = TaskOutcome::Detached;
                }
            }
        }
        self.outcome.clone()
    }

    fn finish(&mut self, result: Result<()>) {
        self.outcome = match result {
            Ok(()) => TaskOutcome::Completed,
            Err(e) => {
                warn!(kind = self.kind.label(), "listening task failed: {e}");
                TaskOutcome::Failed(e.to_string())
            }
        };
        self.reap();
    }

    fn panicked(&mut self) {
        warn!(kind = self.kind.label(), "listening task panicked");
        self.outcome = TaskOutcome::Failed("listening thread panicked".into());
        self.reap();
    }

    fn reap(&mut self) {
        // The exit message is the thread's last action, so this join is brief.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ListenerError;

    fn flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    #[test]
    fn completed_task_reports_completed() {
        let mut task = BackgroundTask::spawn(TaskKind::SingleShot, flag(), || Ok(())).unwrap();
        assert_eq!(
            task.join_timeout(Duration::from_secs(5)),
            TaskOutcome::Completed
        );
        assert_eq!(task.poll(), TaskOutcome::Completed);
    }

    #[test]
    fn error_and_panic_are_failures() {
        let mut failed = BackgroundTask::spawn(TaskKind::Continuous, flag(), || {
            Err(ListenerError::AudioStream("device unplugged".into()))
        })
        .unwrap();
        match failed.join_timeout(Duration::from_secs(5)) {
            TaskOutcome::Failed(msg) => assert!(msg.contains("device unplugged")),
            other => panic!("unexpected outcome {other:?}"),
        }

        let mut panicked =
            BackgroundTask::spawn(TaskKind::Continuous, flag(), || panic!("boom")).unwrap();
        assert!(matches!(
            panicked.join_timeout(Duration::from_secs(5)),
            TaskOutcome::Failed(_)
        ));
    }

    #[test]
    fn cancel_stops_a_cooperative_loop() {
        let cancel = flag();
        let running = Arc::clone(&cancel);
        let mut task = BackgroundTask::spawn(TaskKind::Continuous, cancel, move || {
            while running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(task.poll(), TaskOutcome::Running);
        task.cancel();
        assert_eq!(
            task.join_timeout(Duration::from_secs(5)),
            TaskOutcome::Completed
        );
    }

    #[test]
    fn stuck_task_is_detached_after_timeout() {
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let mut task = BackgroundTask::spawn(TaskKind::Continuous, flag(), move || {
            let _ = release_rx.recv();
            Ok(())
        })
        .unwrap();

        assert_eq!(
            task.join_timeout(Duration::from_millis(20)),
            TaskOutcome::Detached
        );
        assert_eq!(task.poll(), TaskOutcome::Detached);
        assert!(!task.poll().is_finished());
        assert_eq!(
            task.join_timeout(Duration::from_millis(20)),
            TaskOutcome::Detached
        );

        release_tx.send(()).unwrap();
        assert_eq!(
            task.join_timeout(Duration::from_secs(5)),
            TaskOutcome::Completed
        );
        assert_eq!(task.poll(), TaskOutcome::Completed);
    }

    #[test]
    fn detached_task_failure_is_picked_up_by_poll() {
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let mut task = BackgroundTask::spawn(TaskKind::SingleShot, flag(), move || {
            let _ = release_rx.recv();
            Err(ListenerError::AudioStream("read timed out".into()))
        })
        .unwrap();

        assert_eq!(
            task.join_timeout(Duration::from_millis(20)),
            TaskOutcome::Detached
        );
        release_tx.send(()).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let outcome = loop {
            let outcome = task.poll();
            if outcome.is_finished() || std::time::Instant::now() > deadline {
                break outcome;
            }
            thread::sleep(Duration::from_millis(5));
        };
        match outcome {
            TaskOutcome::Failed(msg) => assert!(msg.contains("read timed out")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
