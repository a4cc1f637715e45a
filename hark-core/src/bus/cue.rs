//! "Listening started" sound cue.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{ListenerError, Result};

/// Plays a short audio file. Failures are logged by the caller, never fatal.
pub trait ListeningCue: Send + Sync + 'static {
    fn play(&self, sound: &Path) -> Result<()>;
}

/// Spawns an external player (`aplay` by default) and waits for it.
#[derive(Debug, Clone)]
pub struct CommandCue {
    program: String,
    args: Vec<String>,
}

impl CommandCue {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Default for CommandCue {
    fn default() -> Self {
        Self::new("aplay", vec!["-q".into()])
    }
}

impl ListeningCue for CommandCue {
    fn play(&self, sound: &Path) -> Result<()> {
        debug!(program = %self.program, sound = %sound.display(), "playing cue");
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(sound)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(ListenerError::Other(anyhow::anyhow!(
                "{} exited with {status}",
                self.program
            )))
        }
    }
}
