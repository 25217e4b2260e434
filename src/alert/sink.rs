use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// An audio cue file checked at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertCue {
    path: PathBuf,
}

impl AlertCue {
    /// Verify the cue exists, is a regular file and can be opened.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)
            .with_context(|| format!("alert cue not found: {}", path.display()))?;
        if !meta.is_file() {
            return Err(anyhow!("alert cue is not a file: {}", path.display()));
        }
        File::open(path).with_context(|| format!("alert cue not readable: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Where fired alerts go.
///
/// `play` is best-effort and must return promptly: failures are logged by the
/// sink and never reported back to the stream.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn play(&self, cue: &AlertCue);
}

/// Plays the cue by spawning an external player (ffplay by default) and
/// reaping it on a detached thread.
#[derive(Clone, Debug)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    /// Build from a command line; the cue path is appended as the last argument.
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("alert player command must not be empty"))?;
        if program.trim().is_empty() {
            return Err(anyhow!("alert player program must not be empty"));
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl AlertSink for CommandSink {
    fn name(&self) -> &'static str {
        "command"
    }

    fn play(&self, cue: &AlertCue) {
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(cue.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                log::warn!("alert player {} failed to start: {}", self.program, err);
                return;
            }
        };

        let program = self.program.clone();
        let reaper = std::thread::Builder::new()
            .name("alert-player".to_string())
            .spawn(move || match child.wait() {
                Ok(status) if !status.success() => {
                    log::warn!("alert player {} exited with {}", program, status);
                }
                Ok(_) => {}
                Err(err) => log::warn!("alert player {} wait failed: {}", program, err),
            });
        if let Err(err) = reaper {
            log::warn!("alert player reaper thread failed to start: {}", err);
        }
    }
}

/// Logs fired alerts without playing anything. Used headless.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn play(&self, cue: &AlertCue) {
        log::info!("alert: would play {}", cue.path().display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn cue_must_exist_and_be_a_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(AlertCue::load(dir.path().join("missing.mp3")).is_err());
        assert!(AlertCue::load(dir.path()).is_err());

        let cue_path = dir.path().join("cue.mp3");
        std::fs::write(&cue_path, b"ID3")?;
        let cue = AlertCue::load(&cue_path)?;
        assert_eq!(cue.path(), cue_path.as_path());
        Ok(())
    }

    #[test]
    fn empty_player_command_is_rejected() {
        assert!(CommandSink::new(&[]).is_err());
        assert!(CommandSink::new(&[" ".to_string()]).is_err());
    }

    #[test]
    fn missing_player_does_not_panic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cue_path = dir.path().join("cue.mp3");
        std::fs::write(&cue_path, b"ID3")?;
        let cue = AlertCue::load(&cue_path)?;
        let sink = CommandSink::new(&["/nonexistent/touchwatch-player".to_string()])?;
        sink.play(&cue);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn command_sink_passes_cue_path_to_player() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cue_path = dir.path().join("cue.mp3");
        std::fs::write(&cue_path, b"ID3-cue")?;
        let copied = dir.path().join("played.mp3");
        let cue = AlertCue::load(&cue_path)?;

        let script = format!("cp \"$0\" \"{}\"", copied.display());
        let sink = CommandSink::new(&["sh".to_string(), "-c".to_string(), script])?;
        sink.play(&cue);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !copied.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        // cp may still be writing when the file first appears
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(std::fs::read(&copied)?, b"ID3-cue");
        Ok(())
    }
}
