//! Simulation transcoder for tests.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{EncodeInvocation, TranscodeError, TranscodeProcess, Transcoder};

/// Recording [`Transcoder`] with scripted outcomes.
///
/// Every spawn is recorded in order. Individual variants can be scripted
/// to fail at spawn or at exit, and the whole engine can be put into
/// holding mode where processes run until released or killed, which is
/// how cancellation paths are exercised.
#[derive(Clone, Default)]
pub struct SimulationTranscoder {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    release: Notify,
}

#[derive(Default)]
struct State {
    invocations: Vec<RecordedInvocation>,
    fail_spawn: HashSet<String>,
    fail_exit: HashSet<String>,
    holding: bool,
    released: bool,
    running: usize,
    max_running: usize,
}

/// One recorded engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedInvocation {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub variant: String,
}

impl SimulationTranscoder {
    /// Creates a transcoder where every process succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts spawn failure for one variant label.
    pub fn fail_spawn_of(self, variant: &str) -> Self {
        self.inner.state.lock().fail_spawn.insert(variant.to_string());
        self
    }

    /// Scripts a non-zero exit for one variant label.
    pub fn fail_exit_of(self, variant: &str) -> Self {
        self.inner.state.lock().fail_exit.insert(variant.to_string());
        self
    }

    /// Puts the engine into holding mode: processes block until
    /// [`release_all`](Self::release_all) or a kill.
    pub fn holding(self) -> Self {
        self.inner.state.lock().holding = true;
        self
    }

    /// Lets all held processes run to completion.
    pub fn release_all(&self) {
        self.inner.state.lock().released = true;
        self.inner.release.notify_waiters();
    }

    /// All invocations spawned so far, in order.
    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.inner.state.lock().invocations.clone()
    }

    /// Variant labels of the invocations, in spawn order.
    pub fn invocation_labels(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .invocations
            .iter()
            .map(|invocation| invocation.variant.clone())
            .collect()
    }

    /// Highest number of processes that were running at one instant.
    pub fn max_concurrent(&self) -> usize {
        self.inner.state.lock().max_running
    }

    /// Number of processes currently running.
    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }
}

#[async_trait]
impl Transcoder for SimulationTranscoder {
    async fn spawn(
        &self,
        invocation: &EncodeInvocation,
    ) -> Result<Box<dyn TranscodeProcess>, TranscodeError> {
        let mut state = self.inner.state.lock();

        if state.fail_spawn.contains(invocation.variant) {
            return Err(TranscodeError::SpawnFailed {
                reason: format!("scripted spawn failure for {}", invocation.variant),
            });
        }

        state.invocations.push(RecordedInvocation {
            source: invocation.source.clone(),
            output_dir: invocation.output_dir.clone(),
            variant: invocation.variant.to_string(),
        });

        state.running += 1;
        state.max_running = state.max_running.max(state.running);
        let succeed = !state.fail_exit.contains(invocation.variant);
        drop(state);

        Ok(Box::new(SimulationProcess {
            inner: Arc::clone(&self.inner),
            succeed,
            killed: false,
            finished: false,
        }))
    }

    fn is_available(&self) -> bool {
        true
    }
}

struct SimulationProcess {
    inner: Arc<Inner>,
    succeed: bool,
    killed: bool,
    finished: bool,
}

impl SimulationProcess {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.inner.state.lock().running -= 1;
        }
    }
}

#[async_trait]
impl TranscodeProcess for SimulationProcess {
    async fn wait(&mut self) -> Result<(), TranscodeError> {
        loop {
            let inner = Arc::clone(&self.inner);
            let notified = inner.release.notified();

            if self.killed {
                self.finish();
                return Err(TranscodeError::Killed);
            }

            let held = {
                let state = self.inner.state.lock();
                state.holding && !state.released
            };

            if !held {
                self.finish();
                return if self.succeed {
                    Ok(())
                } else {
                    Err(TranscodeError::ExitFailure {
                        status: "exit status: 1".to_string(),
                    })
                };
            }

            notified.await;
        }
    }

    async fn kill(&mut self) {
        self.killed = true;
        self.finish();
    }
}

impl Drop for SimulationProcess {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::catalog;
    use crate::transcode::plan_invocation;

    fn invocation(variant: &str) -> EncodeInvocation {
        plan_invocation(
            Path::new("in.mkv"),
            Path::new("out"),
            catalog::variant(variant).unwrap(),
            false,
        )
    }

    #[tokio::test]
    async fn test_records_invocations_in_order() {
        let transcoder = SimulationTranscoder::new();

        for variant in ["360p", "720p"] {
            let mut process = transcoder.spawn(&invocation(variant)).await.unwrap();
            process.wait().await.unwrap();
        }

        assert_eq!(transcoder.invocation_labels(), vec!["360p", "720p"]);
        assert_eq!(transcoder.max_concurrent(), 1);
        assert_eq!(transcoder.running(), 0);
    }

    #[tokio::test]
    async fn test_scripted_exit_failure() {
        let transcoder = SimulationTranscoder::new().fail_exit_of("720p");

        let mut ok = transcoder.spawn(&invocation("360p")).await.unwrap();
        assert!(ok.wait().await.is_ok());

        let mut failing = transcoder.spawn(&invocation("720p")).await.unwrap();
        assert!(matches!(
            failing.wait().await,
            Err(TranscodeError::ExitFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_scripted_spawn_failure_records_nothing() {
        let transcoder = SimulationTranscoder::new().fail_spawn_of("360p");

        let result = transcoder.spawn(&invocation("360p")).await;
        assert!(matches!(result, Err(TranscodeError::SpawnFailed { .. })));
        assert!(transcoder.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_held_process_exits_on_release() {
        let transcoder = SimulationTranscoder::new().holding();
        let mut process = transcoder.spawn(&invocation("360p")).await.unwrap();

        let waiter = tokio::spawn(async move { process.wait().await });
        tokio::task::yield_now().await;
        assert_eq!(transcoder.running(), 1);

        transcoder.release_all();
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(transcoder.running(), 0);
    }

    #[tokio::test]
    async fn test_killed_process_reports_killed() {
        let transcoder = SimulationTranscoder::new().holding();
        let mut process = transcoder.spawn(&invocation("360p")).await.unwrap();

        process.kill().await;
        assert!(matches!(process.wait().await, Err(TranscodeError::Killed)));
        assert_eq!(transcoder.running(), 0);
    }
}
