//! The external build step.
//!
//! Building is a synchronous, blocking process invocation; the orchestrator
//! runs it under `spawn_blocking`. Success is a zero exit status, anything
//! else is failure. No timeout is imposed here.

use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to launch build script: {0}")]
    Launch(#[from] std::io::Error),
    #[error("build script failed: {0}")]
    Failed(std::process::ExitStatus),
}

/// Seam for the build invocation so tests can fake it.
pub trait BuildStep: Send + Sync {
    fn run(&self) -> Result<(), BuildError>;
}

/// Runs `sh <script>` and requires a zero exit status.
pub struct ScriptBuild {
    script: PathBuf,
}

impl ScriptBuild {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl BuildStep for ScriptBuild {
    fn run(&self) -> Result<(), BuildError> {
        let status = Command::new("sh").arg(&self.script).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(BuildError::Failed(status))
        }
    }
}
