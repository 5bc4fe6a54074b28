//! Transcoding engine collaborator contract.
//!
//! The core depends on nothing beyond "spawn a process with these
//! arguments; it exits zero on success and writes segment and manifest
//! files into the given output directory." Production shells out to the
//! configured ffmpeg binary; a simulation implementation records
//! invocations and produces scripted outcomes for tests.

pub mod simulation;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

pub use simulation::SimulationTranscoder;

/// One planned invocation of the transcoding engine.
#[derive(Debug, Clone)]
pub struct EncodeInvocation {
    /// Absolute path of the source video
    pub source: PathBuf,
    /// Directory segment and manifest files are written into
    pub output_dir: PathBuf,
    /// Resolution label this invocation encodes
    pub variant: &'static str,
    /// Full argument vector handed to the engine
    pub args: Vec<OsString>,
}

/// Errors surfaced by transcoding operations.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Transcoding engine unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Failed to start transcode process: {reason}")]
    SpawnFailed { reason: String },

    #[error("Transcode process exited with {status}")]
    ExitFailure { status: String },

    #[error("Transcode process was killed")]
    Killed,
}

/// Handle to one running transcode subprocess.
#[async_trait]
pub trait TranscodeProcess: Send {
    /// Waits for the process to exit.
    ///
    /// # Errors
    /// - `TranscodeError::ExitFailure` - Non-zero exit status
    /// - `TranscodeError::Killed` - Process was killed before exiting
    async fn wait(&mut self) -> Result<(), TranscodeError>;

    /// Kills the process immediately.
    async fn kill(&mut self);
}

/// Abstraction over the transcoding engine.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Spawns one encode invocation, returning its process handle.
    ///
    /// # Errors
    /// - `TranscodeError::SpawnFailed` - Engine binary failed to start
    async fn spawn(
        &self,
        invocation: &EncodeInvocation,
    ) -> Result<Box<dyn TranscodeProcess>, TranscodeError>;

    /// Checks whether the engine is installed and runnable.
    fn is_available(&self) -> bool;
}

/// Production transcoder shelling out to an ffmpeg binary.
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    /// Creates a transcoder around the given ffmpeg binary path.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Verifies the binary responds to a version probe.
    fn verify_installation(&self) -> Result<(), TranscodeError> {
        let result = std::process::Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(TranscodeError::Unavailable {
                reason: format!("{} -version exited with {status}", self.binary.display()),
            }),
            Err(error) => Err(TranscodeError::Unavailable {
                reason: format!("{} not runnable: {error}", self.binary.display()),
            }),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn spawn(
        &self,
        invocation: &EncodeInvocation,
    ) -> Result<Box<dyn TranscodeProcess>, TranscodeError> {
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            "Starting {} encode of {} into {}",
            invocation.variant,
            invocation.source.display(),
            invocation.output_dir.display()
        );
        tracing::debug!("Executing: {} {:?}", self.binary.display(), invocation.args);

        let mut child = command.spawn().map_err(|error| TranscodeError::SpawnFailed {
            reason: format!("{}: {error}", self.binary.display()),
        })?;

        // ffmpeg reports onto stderr; it must be drained or the pipe
        // fills and stalls the encode.
        if let Some(stderr) = child.stderr.take() {
            let variant = invocation.variant;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("ffmpeg[{variant}]: {line}");
                }
            });
        }

        Ok(Box::new(FfmpegProcess { child }))
    }

    fn is_available(&self) -> bool {
        self.verify_installation().is_ok()
    }
}

struct FfmpegProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl TranscodeProcess for FfmpegProcess {
    async fn wait(&mut self) -> Result<(), TranscodeError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|error| TranscodeError::ExitFailure {
                status: format!("wait failed: {error}"),
            })?;

        if status.success() {
            Ok(())
        } else if status.code().is_none() {
            // No exit code means the process died to a signal.
            Err(TranscodeError::Killed)
        } else {
            Err(TranscodeError::ExitFailure {
                status: status.to_string(),
            })
        }
    }

    async fn kill(&mut self) {
        if let Err(error) = self.child.kill().await {
            tracing::warn!("Failed to kill transcode process: {error}");
        }
    }
}

/// Builds the invocation for one variant from catalog parameters.
pub fn plan_invocation(
    source: &Path,
    output_dir: &Path,
    variant: &crate::catalog::Variant,
    hardware_accel: bool,
) -> EncodeInvocation {
    EncodeInvocation {
        source: source.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        variant: variant.label,
        args: crate::catalog::transcode_args(source, output_dir, variant, hardware_accel),
    }
}
